//! Slot manager entry point
//!
//! [`SlotManager`] ties the pieces together: it builds the slot table from
//! a [`SlotConfig`], runs startup recovery, and hands out sessions.
//!
//! # Example
//!
//! ```no_run
//! use replslot_core::{Lsn, SlotPersistency, WalLevel};
//! use replslot_engine::SlotManager;
//!
//! let manager = SlotManager::builder()
//!     .data_dir("/var/lib/db")
//!     .wal_level(WalLevel::Logical)
//!     .open()?;
//!
//! let mut session = manager.session();
//! session.create("standby_1", SlotPersistency::Persistent, false, None, Lsn(0x1000))?;
//! session.release()?;
//!
//! manager.checkpoint()?;
//! # Ok::<(), replslot_core::SlotError>(())
//! ```

use crate::config::SlotConfig;
use crate::recovery::{RecoveryReport, SlotRecovery};
use replslot_concurrency::{LsnWatermark, SlotInfo, SlotSession, SlotTable};
use replslot_core::{
    DatabaseId, Lsn, PublishedWatermarks, Result, RetentionSink, ServerState, StaticServerState,
    WalLevel,
};
use replslot_durability::SlotStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Replication slot subsystem of one server
pub struct SlotManager {
    table: Arc<SlotTable>,
    config: SlotConfig,
    recovery: RecoveryReport,
}

impl std::fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotManager")
            .field("config", &self.config)
            .field("table", &self.table)
            .finish()
    }
}

impl SlotManager {
    /// Open the slot subsystem under `data_dir` with default settings.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::builder().data_dir(data_dir).open()
    }

    /// Create a builder for slot manager configuration.
    pub fn builder() -> SlotManagerBuilder {
        SlotManagerBuilder::new()
    }

    /// New session with no slot bound
    pub fn session(&self) -> SlotSession {
        SlotSession::new(self.table.clone())
    }

    /// The shared slot table
    pub fn table(&self) -> &Arc<SlotTable> {
        &self.table
    }

    /// Active configuration
    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// What startup recovery found
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Flush every dirty slot to disk
    ///
    /// Meant to run as part of a checkpoint. Per-slot failures are logged;
    /// only critical ones are returned. Returns the number of slots written.
    pub fn checkpoint(&self) -> Result<usize> {
        self.table.flush_all()
    }

    /// Whether a slot named `name` exists
    pub fn find(&self, name: &str) -> Result<bool> {
        self.table.find(name)
    }

    /// Drop the slot named `name`
    pub fn drop_slot(&self, name: &str) -> Result<()> {
        self.table.drop_slot(name)
    }

    /// Copies of every slot
    pub fn slots(&self) -> Vec<SlotInfo> {
        self.table.slots()
    }

    /// Log every slot's restart position
    pub fn report_restart_lsn(&self) {
        self.table.report_restart_lsn()
    }

    /// Recompute and publish the restart LSN range
    pub fn compute_required_lsn(&self) -> LsnWatermark {
        self.table.compute_required_lsn()
    }

    /// Oldest restart LSN of the logical slots
    pub fn compute_logical_restart_lsn(&self) -> Lsn {
        self.table.compute_logical_restart_lsn()
    }

    /// Logical slots on `database`: (total, active)
    pub fn count_db_slots(&self, database: DatabaseId) -> (usize, usize) {
        self.table.count_db_slots(database)
    }
}

/// Builder for [`SlotManager`]
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use replslot_core::{PublishedWatermarks, ServerMode, StaticServerState};
/// use replslot_engine::SlotManager;
///
/// let server = Arc::new(StaticServerState::new(ServerMode::Standby));
/// let marks = Arc::new(PublishedWatermarks::new());
///
/// let manager = SlotManager::builder()
///     .data_dir("/var/lib/db")
///     .max_replication_slots(16)
///     .server_state(server)
///     .retention_sink(marks.clone())
///     .open()?;
/// # Ok::<(), replslot_core::SlotError>(())
/// ```
pub struct SlotManagerBuilder {
    config: SlotConfig,
    server: Option<Arc<dyn ServerState>>,
    sink: Option<Arc<dyn RetentionSink>>,
}

impl SlotManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SlotConfig::default(),
            server: None,
            sink: None,
        }
    }

    /// Replace every setting with `config`.
    pub fn config(mut self, config: SlotConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.data_dir = PathBuf::from(path.as_ref());
        self
    }

    /// Set the slot table capacity.
    pub fn max_replication_slots(mut self, capacity: usize) -> Self {
        self.config.max_replication_slots = capacity;
        self
    }

    /// Set the WAL level.
    pub fn wal_level(mut self, wal_level: WalLevel) -> Self {
        self.config.wal_level = wal_level;
        self
    }

    /// Use `server` for role and lifecycle queries.
    ///
    /// Defaults to a running primary.
    pub fn server_state(mut self, server: Arc<dyn ServerState>) -> Self {
        self.server = Some(server);
        self
    }

    /// Publish watermarks to `sink`.
    ///
    /// Defaults to an in-memory [`PublishedWatermarks`].
    pub fn retention_sink(mut self, sink: Arc<dyn RetentionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the table and run startup recovery.
    pub fn open(self) -> Result<SlotManager> {
        let server: Arc<dyn ServerState> = match self.server {
            Some(server) => server,
            None => Arc::new(StaticServerState::default()),
        };
        let sink: Arc<dyn RetentionSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(PublishedWatermarks::new()),
        };

        let table = SlotTable::new(
            self.config.max_replication_slots,
            SlotStore::new(&self.config.data_dir),
            server,
            sink,
            self.config.wal_level,
        );
        let recovery = SlotRecovery::recover(&table)?;

        Ok(SlotManager {
            table: Arc::new(table),
            config: self.config,
            recovery,
        })
    }
}

impl Default for SlotManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
