//! Startup recovery of replication slots
//!
//! Runs once, before anything else touches the table:
//!
//! 1. Make sure `pg_replslot` exists
//! 2. Walk its directories in name order
//! 3. Delete `*.tmp` leftovers of interrupted creates and drops
//! 4. Load every other directory, healing from `state.backup` if needed
//! 5. Install persistent slots, discard the rest
//! 6. Publish the initial watermarks
//!
//! Any slot that can't be read is fatal: continuing without it would let
//! the server recycle WAL a consumer still needs.

use replslot_concurrency::SlotTable;
use replslot_core::{Result, SlotName};
use replslot_durability::{LoadOutcome, SlotDirEntry};
use tracing::{info, warn};

/// What startup recovery did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Slots installed in the table
    pub restored: Vec<SlotName>,
    /// Restored slots whose primary record was rebuilt from the backup
    pub repaired: Vec<SlotName>,
    /// Non-persistent slots removed from disk
    pub discarded: Vec<SlotName>,
    /// Leftover `*.tmp` directories removed
    pub leftovers_removed: usize,
    /// Leftover `*.tmp` directories that could not be removed
    pub leftovers_failed: usize,
}

impl RecoveryReport {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "restored {} replication slots ({} repaired), discarded {}, removed {} leftover directories",
            self.restored.len(),
            self.repaired.len(),
            self.discarded.len(),
            self.leftovers_removed
        )
    }

    /// Whether recovery had to fix anything
    pub fn has_issues(&self) -> bool {
        !self.repaired.is_empty() || self.leftovers_failed > 0
    }
}

/// Startup recovery driver
pub struct SlotRecovery;

impl SlotRecovery {
    /// Restore every slot from disk into `table`
    ///
    /// # Errors
    /// `Io` or `CorruptRecord` for a slot that can't be read,
    /// `CapacityExceededOnRestore` if the table is too small. All of them
    /// are fatal for startup.
    pub fn recover(table: &SlotTable) -> Result<RecoveryReport> {
        let store = table.store();
        info!(path = %store.base_dir().display(), "starting up replication slots");

        store.ensure_base_dir()?;

        let mut report = RecoveryReport::default();
        for entry in store.scan()? {
            match entry {
                SlotDirEntry::Leftover(path) => match store.remove_leftover(&path) {
                    Ok(()) => {
                        info!(path = %path.display(), "removed leftover slot directory");
                        report.leftovers_removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "could not remove directory");
                        report.leftovers_failed += 1;
                    }
                },
                SlotDirEntry::Slot(path) => match store.load_slot_dir(&path)? {
                    LoadOutcome::Restored { data, repaired } => {
                        let name = data.name.clone();
                        table.restore(data)?;
                        if repaired {
                            report.repaired.push(name.clone());
                        }
                        report.restored.push(name);
                    }
                    LoadOutcome::Discarded(data) => report.discarded.push(data.name),
                },
            }
        }

        if table.capacity() > 0 {
            table.compute_required_xmin(false);
            table.compute_required_lsn();
        }

        info!("{}", report.summary());
        Ok(report)
    }
}
