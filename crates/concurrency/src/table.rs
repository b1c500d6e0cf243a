//! Fixed-capacity replication slot table
//!
//! ## Locking
//!
//! Four tiers, coarsest first. A coarser lock is never taken while a finer
//! one is held.
//!
//! ```text
//! allocation_lock  RwLock   create/drop exclusive, checkpoint shared
//! control_lock     RwLock   scans shared, in_use flips exclusive
//! slot fast path   Mutex    field reads and writes, never across I/O
//! slot I/O         Mutex    disk reads and writes of one slot
//! ```
//!
//! Holding `allocation_lock` in any mode is enough to keep the `in_use`
//! flags stable, which lets a checkpoint walk the table without blocking
//! scans or acquires.
//!
//! ## Critical failures
//!
//! An fsync failure after a durable rename leaves the on-disk state unknown.
//! The table remembers it and refuses all further disk work with
//! [`SlotError::Poisoned`] until the process restarts and recovery runs.

use crate::slot::{ReplicationSlot, SlotHandle, SlotInfo};
use crate::slot::SlotState;
use parking_lot::{MutexGuard, RwLock};
use replslot_core::{
    validate_slot_name, DatabaseId, ErrorLevel, Lsn, Result, RetentionSink, ServerState,
    SlotCandidates, SlotData, SlotError, SlotName, SlotPersistency, TransactionId, WalLevel,
};
use replslot_durability::{PersistentSlot, SlotStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`SlotTable::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new slot was created and is owned by the caller
    Created(SlotHandle),
    /// A physical slot of that name already exists; acquire it instead
    Exists,
}

enum ScanResult {
    Collision,
    Free(usize),
    Full,
}

/// Shared table of replication slots
pub struct SlotTable {
    slots: Box<[ReplicationSlot]>,
    allocation_lock: RwLock<()>,
    pub(crate) control_lock: RwLock<()>,
    store: SlotStore,
    pub(crate) server: Arc<dyn ServerState>,
    pub(crate) sink: Arc<dyn RetentionSink>,
    wal_level: WalLevel,
    poisoned: AtomicBool,
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.slots.len())
            .field("base_dir", &self.store.base_dir())
            .field("wal_level", &self.wal_level)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl SlotTable {
    /// Build an empty table
    ///
    /// # Arguments
    /// * `capacity` - Number of entries, fixed for the table's lifetime
    /// * `store` - On-disk home of the slots
    /// * `server` - Role and lifecycle of the surrounding server
    /// * `sink` - Receiver of the computed watermarks
    /// * `wal_level` - Configured WAL level
    pub fn new(
        capacity: usize,
        store: SlotStore,
        server: Arc<dyn ServerState>,
        sink: Arc<dyn RetentionSink>,
        wal_level: WalLevel,
    ) -> Self {
        let slots = (0..capacity).map(|_| ReplicationSlot::new()).collect();
        Self {
            slots,
            allocation_lock: RwLock::new(()),
            control_lock: RwLock::new(()),
            store,
            server,
            sink,
            wal_level,
            poisoned: AtomicBool::new(false),
        }
    }

    /// Number of entries
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// On-disk store
    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    /// Whether a critical failure has disabled the table
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn entries(&self) -> &[ReplicationSlot] {
        &self.slots
    }

    /// Fast-path guard of the slot `handle` refers to
    ///
    /// `NoSlotBound` once the slot has been dropped, even if its entry was
    /// reused since.
    fn lock_owned(&self, handle: SlotHandle) -> Result<MutexGuard<'_, SlotState>> {
        let slot = &self.slots[handle.index()];
        let state = slot.lock();
        if !slot.in_use() || state.generation != handle.generation() {
            return Err(SlotError::NoSlotBound);
        }
        Ok(state)
    }

    fn owned(&self, handle: SlotHandle) -> Result<&ReplicationSlot> {
        self.lock_owned(handle)?;
        Ok(&self.slots[handle.index()])
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(SlotError::Poisoned);
        }
        Ok(())
    }

    /// Poison the table if `result` carries a critical error.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(SlotError::Critical { .. }) = &result {
            if !self.poisoned.swap(true, Ordering::AcqRel) {
                tracing::error!("replication slot table disabled after critical failure");
            }
        }
        result
    }

    /// Check that the configuration allows slots at all.
    pub fn check_requirements(&self) -> Result<()> {
        if self.capacity() == 0 {
            return Err(SlotError::NotConfigured(
                "replication slots can only be used if max_replication_slots > 0".into(),
            ));
        }
        if self.wal_level < WalLevel::Archive {
            return Err(SlotError::NotConfigured(
                "replication slots can only be used if wal_level >= archive".into(),
            ));
        }
        Ok(())
    }

    /// Create a slot and make the caller its owner
    ///
    /// The slot is written to disk before it becomes visible to scans, so a
    /// crash never leaves an in-memory slot without a directory.
    ///
    /// # Returns
    /// - `Created(handle)` for a new slot, already active
    /// - `Exists` when a physical slot of that name exists; the caller is
    ///   expected to acquire it
    ///
    /// # Errors
    /// `NameInvalid`, `DuplicateName` (logical requests only),
    /// `CapacityExceeded`, `Io`, `Critical`.
    pub fn create(
        &self,
        name: &str,
        persistency: SlotPersistency,
        is_dummy_standby: bool,
        database: Option<DatabaseId>,
        restart_lsn: Lsn,
    ) -> Result<CreateOutcome> {
        self.check_poisoned()?;
        let name = SlotName::new(name)?;

        let _alloc = self.allocation_lock.write();

        match self.scan_for_create(&name) {
            ScanResult::Collision => {
                if database.is_some() {
                    return Err(SlotError::DuplicateName(name.to_string()));
                }
                warn!(slot = %name, "replication slot already exists");
                Ok(CreateOutcome::Exists)
            }
            ScanResult::Full => {
                for info in self.slots() {
                    info!(slot = %info.data.name, "replication slot in use");
                }
                Err(SlotError::CapacityExceeded {
                    capacity: self.capacity(),
                })
            }
            ScanResult::Free(index) => {
                let slot = &self.slots[index];
                slot.lock().reset(SlotData::new(
                    name.clone(),
                    persistency,
                    is_dummy_standby,
                    database,
                    restart_lsn,
                ));

                // Not visible yet; a failure here needs no cleanup.
                self.track(self.store.create_slot(slot))?;

                let generation = {
                    let _scan = self.control_lock.write();
                    let mut state = slot.lock();
                    state.active = true;
                    slot.set_in_use(&mut state, true)
                };

                info!(
                    slot = %name,
                    persistency = ?persistency,
                    logical = database.is_some(),
                    restart_lsn = %restart_lsn,
                    "created replication slot"
                );
                Ok(CreateOutcome::Created(SlotHandle::new(index, generation)))
            }
        }
    }

    fn scan_for_create(&self, name: &SlotName) -> ScanResult {
        let _scan = self.control_lock.read();
        let mut free = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.in_use() {
                if slot.lock().data.name == *name {
                    return ScanResult::Collision;
                }
            } else if free.is_none() {
                free = Some(index);
            }
        }
        free.map_or(ScanResult::Full, ScanResult::Free)
    }

    /// Take ownership of an existing slot
    ///
    /// An active physical slot requested with the same dummy-standby flag is
    /// taken over from its previous owner with a warning. An active logical
    /// slot, or a flag mismatch, is a conflict.
    pub fn acquire(&self, name: &str, is_dummy_standby: bool) -> Result<SlotHandle> {
        self.check_poisoned()?;
        let name = SlotName::new(name)?;

        let found = {
            let _scan = self.control_lock.read();
            self.slots.iter().enumerate().find_map(|(index, slot)| {
                if !slot.in_use() {
                    return None;
                }
                let mut state = slot.lock();
                if state.data.name != name {
                    return None;
                }
                let was_active = state.active;
                state.active = true;
                Some((index, state.generation, was_active))
            })
        };

        let (index, generation, was_active) =
            found.ok_or_else(|| SlotError::NotFound(name.to_string()))?;
        let slot = &self.slots[index];

        let mut state = slot.lock();
        if was_active {
            if state.data.is_logical() || state.data.is_dummy_standby != is_dummy_standby {
                return Err(SlotError::AlreadyActive(name.to_string()));
            }
            warn!(slot = %name, "replication slot is already active, taking it over");
        }
        if state.data.is_logical() {
            state.candidates = SlotCandidates::default();
        }
        drop(state);

        debug!(slot = %name, "acquired replication slot");
        Ok(SlotHandle::new(index, generation))
    }

    /// Whether an in-use slot carries `name`.
    pub fn find(&self, name: &str) -> Result<bool> {
        validate_slot_name(name, ErrorLevel::Error)?;

        let _scan = self.control_lock.read();
        Ok(self
            .slots
            .iter()
            .any(|slot| slot.in_use() && slot.lock().data.name.as_str() == name))
    }

    /// Give up ownership of a slot
    ///
    /// An ephemeral slot is dropped instead. A slot that was only holding
    /// back xmin for an exported snapshot stops doing so. Releasing a
    /// handle whose slot has been dropped does nothing.
    pub fn release(&self, handle: SlotHandle) -> Result<()> {
        let persistency = match self.lock_owned(handle) {
            Ok(state) if state.active => state.data.persistency,
            _ => return Ok(()),
        };
        let slot = &self.slots[handle.index()];

        if persistency == SlotPersistency::Ephemeral {
            return self.drop_acquired(handle);
        }

        let exported_snapshot = {
            let mut state = self.lock_owned(handle)?;
            state.active = false;
            if !state.data.xmin.is_valid() && state.effective_xmin.is_valid() {
                state.effective_xmin = TransactionId::INVALID;
                true
            } else {
                false
            }
        };
        if exported_snapshot {
            self.compute_required_xmin(false);
        }

        debug!(slot = %slot.slot_name(), "released replication slot");
        Ok(())
    }

    /// Drop the slot named `name`
    ///
    /// The slot is acquired first, so an active logical slot can't be
    /// dropped from under its owner.
    pub fn drop_slot(&self, name: &str) -> Result<()> {
        validate_slot_name(name, ErrorLevel::Error)?;

        let handle = self.acquire(name, false)?;
        let (slot_name, is_logical) = {
            let state = self.lock_owned(handle)?;
            (state.data.name.clone(), state.data.is_logical())
        };

        self.drop_acquired(handle)?;

        if self.server.is_running() && !self.server.recovery_in_progress() && is_logical {
            self.server.log_slot_drop(&slot_name);
        }
        Ok(())
    }

    /// Drop a slot the caller owns
    ///
    /// # Drop Sequence
    ///
    /// 1. Take the allocation lock exclusively
    /// 2. Rename `<name>` to `<name>.tmp` and fsync (crash section)
    /// 3. Clear `in_use` under the exclusive scan lock
    /// 4. Recompute both watermarks
    /// 5. Remove `<name>.tmp`, warning on failure
    ///
    /// A failed rename leaves a persistent slot in place, inactive, and
    /// returns the error. For an ephemeral slot it is only a warning.
    pub fn drop_acquired(&self, handle: SlotHandle) -> Result<()> {
        self.check_poisoned()?;
        let _alloc = self.allocation_lock.write();

        let slot = self.owned(handle)?;
        let (name, persistency) = {
            let state = slot.lock();
            (state.data.name.clone(), state.data.persistency)
        };

        match self.track(self.store.retire_slot_dir(&name)) {
            Ok(()) => {}
            Err(e) if e.is_critical() => return Err(e),
            Err(e) => {
                slot.lock().active = false;
                let level = if persistency == SlotPersistency::Ephemeral {
                    ErrorLevel::Warning
                } else {
                    ErrorLevel::Error
                };
                level.report(e)?;
            }
        }

        {
            let _scan = self.control_lock.write();
            let mut state = slot.lock();
            state.active = false;
            slot.set_in_use(&mut state, false);
        }

        self.compute_required_xmin(false);
        self.compute_required_lsn();

        if let Err(e) = self.store.remove_retired_dir(&name) {
            warn!(slot = %name, error = %e, "could not remove dropped slot directory");
        }

        info!(slot = %name, "dropped replication slot");
        Ok(())
    }

    /// Flag the slot for the next save.
    pub fn mark_dirty(&self, handle: SlotHandle) -> Result<()> {
        self.lock_owned(handle)?.mark_dirty();
        Ok(())
    }

    /// Make the slot's current state durable
    ///
    /// Recreates the slot directory if it has gone missing. Errors are
    /// returned, except for ephemeral slots where they are logged.
    pub fn save(&self, handle: SlotHandle) -> Result<()> {
        self.check_poisoned()?;
        let slot = self.owned(handle)?;
        let (name, persistency) = {
            let state = slot.lock();
            (state.data.name.clone(), state.data.persistency)
        };

        if !self.store.slot_dir_exists(&name) {
            self.track(self.store.create_slot(slot))?;
        }

        let level = if persistency == SlotPersistency::Ephemeral {
            ErrorLevel::Warning
        } else {
            ErrorLevel::Error
        };
        self.track(self.store.save_slot(slot, &self.store.slot_dir(&name), level))?;
        Ok(())
    }

    /// Turn an ephemeral or drop-on-error slot into a persistent one.
    pub fn make_persistent(&self, handle: SlotHandle) -> Result<()> {
        {
            let mut state = self.lock_owned(handle)?;
            if state.data.persistency == SlotPersistency::Persistent {
                return Ok(());
            }
            state.data.persistency = SlotPersistency::Persistent;
            state.mark_dirty();
        }
        self.save(handle)
    }

    /// Forget the restart position of a dummy-standby slot
    ///
    /// Returns whether anything changed.
    pub fn invalidate_dummy_standby_lsn(&self, handle: SlotHandle) -> Result<bool> {
        {
            let mut state = self.lock_owned(handle)?;
            if !state.data.is_dummy_standby || !state.data.restart_lsn.is_valid() {
                return Ok(false);
            }
            state.data.restart_lsn = Lsn::INVALID;
            state.mark_dirty();
        }
        self.compute_required_lsn();
        Ok(true)
    }

    /// Move the slot's restart position
    pub fn set_restart_lsn(&self, handle: SlotHandle, restart_lsn: Lsn) -> Result<()> {
        let mut state = self.lock_owned(handle)?;
        state.data.restart_lsn = restart_lsn;
        state.mark_dirty();
        Ok(())
    }

    /// Set the requested data horizon
    pub fn set_xmin(&self, handle: SlotHandle, xmin: TransactionId) -> Result<()> {
        let mut state = self.lock_owned(handle)?;
        state.data.xmin = xmin;
        state.mark_dirty();
        Ok(())
    }

    /// Set the requested catalog horizon
    pub fn set_catalog_xmin(&self, handle: SlotHandle, catalog_xmin: TransactionId) -> Result<()> {
        let mut state = self.lock_owned(handle)?;
        state.data.catalog_xmin = catalog_xmin;
        state.mark_dirty();
        Ok(())
    }

    /// Start enforcing the requested horizons and publish the new minimum
    ///
    /// Call after the requested values have been saved. An effective horizon
    /// only becomes invalid when the requested one already is.
    pub fn sync_effective_horizons(&self, handle: SlotHandle) -> Result<()> {
        {
            let mut state = self.lock_owned(handle)?;
            state.effective_xmin = state.data.xmin;
            state.effective_catalog_xmin = state.data.catalog_xmin;
        }
        self.compute_required_xmin(false);
        Ok(())
    }

    /// Hold back the data horizon for an exported snapshot
    ///
    /// Lasts until the slot is released.
    pub fn set_exported_snapshot_xmin(
        &self,
        handle: SlotHandle,
        xmin: TransactionId,
    ) -> Result<()> {
        self.lock_owned(handle)?.effective_xmin = xmin;
        self.compute_required_xmin(false);
        Ok(())
    }

    /// Stage advancement values
    pub fn set_candidates(&self, handle: SlotHandle, candidates: SlotCandidates) -> Result<()> {
        self.lock_owned(handle)?.candidates = candidates;
        Ok(())
    }

    /// Copy of the slot's current state
    pub fn info(&self, handle: SlotHandle) -> Result<SlotInfo> {
        Ok(self.lock_owned(handle)?.info())
    }

    /// Copies of every in-use slot, in table order
    pub fn slots(&self) -> Vec<SlotInfo> {
        let _scan = self.control_lock.read();
        self.slots
            .iter()
            .filter(|slot| slot.in_use())
            .map(|slot| slot.lock().info())
            .collect()
    }

    /// Log name, dummy flag and restart position of every in-use slot.
    pub fn report_restart_lsn(&self) {
        for info in self.slots() {
            info!(
                slot = %info.data.name,
                dummy = info.data.is_dummy_standby,
                restart_lsn = %info.data.restart_lsn,
                "replication slot restart position"
            );
        }
    }

    /// Install a slot read from disk at startup
    ///
    /// The slot lands in the first free entry, inactive, with its effective
    /// horizons equal to the stored ones.
    pub fn restore(&self, data: SlotData) -> Result<()> {
        let _alloc = self.allocation_lock.write();
        let _scan = self.control_lock.write();

        let slot = self
            .slots
            .iter()
            .find(|slot| !slot.in_use())
            .ok_or_else(|| SlotError::CapacityExceededOnRestore {
                capacity: self.capacity(),
                name: data.name.to_string(),
            })?;

        debug!(slot = %data.name, restart_lsn = %data.restart_lsn, "restored replication slot");
        let mut state = slot.lock();
        state.restore(data);
        slot.set_in_use(&mut state, true);
        Ok(())
    }

    /// Write every dirty slot to disk
    ///
    /// Failures are logged and skipped so one broken slot does not hold
    /// back the others; only critical failures are returned. Returns the
    /// number of slots written.
    pub fn flush_all(&self) -> Result<usize> {
        self.check_poisoned()?;
        debug!("performing replication slot checkpoint");

        let _alloc = self.allocation_lock.read();

        let mut written = 0;
        for slot in self.slots.iter().filter(|slot| slot.in_use()) {
            let name = slot.slot_name();

            if !self.store.slot_dir_exists(&name) {
                if let Err(e) = self.track(self.store.create_slot(slot)) {
                    ErrorLevel::Warning.report(e)?;
                    continue;
                }
                written += 1;
            }

            let dir = self.store.slot_dir(&name);
            if self.track(self.store.save_slot(slot, &dir, ErrorLevel::Warning))? {
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replslot_core::{PublishedWatermarks, ServerMode, StaticServerState};
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        table: Arc<SlotTable>,
        server: Arc<StaticServerState>,
        marks: Arc<PublishedWatermarks>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = SlotStore::new(temp.path());
        store.ensure_base_dir().unwrap();
        let server = Arc::new(StaticServerState::new(ServerMode::Primary));
        let marks = Arc::new(PublishedWatermarks::new());
        let table = Arc::new(SlotTable::new(
            capacity,
            store,
            server.clone(),
            marks.clone(),
            WalLevel::Logical,
        ));
        Fixture {
            _temp: temp,
            table,
            server,
            marks,
        }
    }

    fn db() -> Option<DatabaseId> {
        DatabaseId::new(1)
    }

    fn create(table: &SlotTable, name: &str, database: Option<DatabaseId>) -> SlotHandle {
        match table
            .create(name, SlotPersistency::Persistent, false, database, Lsn(100))
            .unwrap()
        {
            CreateOutcome::Created(handle) => handle,
            CreateOutcome::Exists => panic!("slot {} already existed", name),
        }
    }

    // ===== Create Tests =====

    #[test]
    fn test_create_then_find() {
        let f = fixture(4);
        let handle = create(&f.table, "s1", None);

        assert!(f.table.find("s1").unwrap());
        assert!(!f.table.find("s2").unwrap());
        assert!(f.table.store().slot_dir_exists(&SlotName::new("s1").unwrap()));

        let info = f.table.info(handle).unwrap();
        assert!(info.active, "creator owns the slot");
        assert!(!info.dirty, "create leaves the slot saved");
        assert_eq!(info.data.restart_lsn, Lsn(100));
    }

    #[test]
    fn test_create_invalid_name() {
        let f = fixture(4);
        let err = f
            .table
            .create("Bad Name", SlotPersistency::Persistent, false, None, Lsn(0))
            .unwrap_err();
        assert!(matches!(err, SlotError::NameInvalid { .. }));
        assert!(f.table.slots().is_empty());
    }

    #[test]
    fn test_duplicate_physical_create_reports_exists() {
        let f = fixture(4);
        create(&f.table, "phys", None);

        let outcome = f
            .table
            .create("phys", SlotPersistency::Persistent, false, None, Lsn(5))
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Exists);
        assert_eq!(f.table.slots().len(), 1);
    }

    #[test]
    fn test_duplicate_logical_create_fails() {
        let f = fixture(4);
        create(&f.table, "phys", None);
        create(&f.table, "logi", db());

        for name in ["phys", "logi"] {
            let err = f
                .table
                .create(name, SlotPersistency::Persistent, false, db(), Lsn(5))
                .unwrap_err();
            assert!(matches!(err, SlotError::DuplicateName(_)), "got {:?}", err);
        }
        assert_eq!(f.table.slots().len(), 2);
    }

    #[test]
    fn test_capacity_exceeded() {
        let f = fixture(2);
        create(&f.table, "a", None);
        create(&f.table, "b", None);

        let err = f
            .table
            .create("c", SlotPersistency::Persistent, false, None, Lsn(0))
            .unwrap_err();
        assert!(matches!(err, SlotError::CapacityExceeded { capacity: 2 }));

        let names: Vec<_> = f
            .table
            .slots()
            .into_iter()
            .map(|s| s.data.name.to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"], "existing slots untouched");
    }

    #[test]
    fn test_check_requirements() {
        let temp = TempDir::new().unwrap();
        let build = |capacity, wal_level| {
            SlotTable::new(
                capacity,
                SlotStore::new(temp.path()),
                Arc::new(StaticServerState::default()),
                Arc::new(PublishedWatermarks::new()),
                wal_level,
            )
        };

        assert!(build(4, WalLevel::Archive).check_requirements().is_ok());
        assert!(matches!(
            build(0, WalLevel::Logical).check_requirements(),
            Err(SlotError::NotConfigured(_))
        ));
        assert!(matches!(
            build(4, WalLevel::Minimal).check_requirements(),
            Err(SlotError::NotConfigured(_))
        ));
    }

    // ===== Acquire / Release Tests =====

    #[test]
    fn test_acquire_missing() {
        let f = fixture(2);
        assert!(f.table.acquire("nope", false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_acquire_active_physical_steals() {
        let f = fixture(2);
        let first = create(&f.table, "phys", None);
        let second = f.table.acquire("phys", false).unwrap();
        assert_eq!(first, second);
        assert!(f.table.info(second).unwrap().active);
    }

    #[test]
    fn test_acquire_active_conflicts() {
        let f = fixture(4);
        create(&f.table, "logi", db());
        create(&f.table, "phys", None);

        let err = f.table.acquire("logi", false).unwrap_err();
        assert!(matches!(err, SlotError::AlreadyActive(_)));

        let err = f.table.acquire("phys", true).unwrap_err();
        assert!(err.is_conflict(), "dummy-standby mismatch is a conflict");
    }

    #[test]
    fn test_acquire_resets_logical_candidates() {
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.set_candidates(
            handle,
            SlotCandidates {
                restart_lsn: Lsn(1),
                restart_valid: Lsn(2),
                xmin_lsn: Lsn(3),
                catalog_xmin: TransactionId(4),
            },
        )
        .unwrap();
        f.table.release(handle).unwrap();

        let handle = f.table.acquire("logi", false).unwrap();
        assert_eq!(f.table.info(handle).unwrap().candidates, SlotCandidates::default());
    }

    #[test]
    fn test_release_then_reacquire() {
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.release(handle).unwrap();
        assert!(!f.table.info(handle).unwrap().active);

        // releasing twice is harmless
        f.table.release(handle).unwrap();
        f.table.acquire("logi", false).unwrap();
    }

    #[test]
    fn test_release_clears_exported_snapshot_xmin() {
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.set_exported_snapshot_xmin(handle, TransactionId(77)).unwrap();
        assert_eq!(f.marks.xmin(), TransactionId(77));

        f.table.release(handle).unwrap();
        assert_eq!(f.table.info(handle).unwrap().effective_xmin, TransactionId::INVALID);
        assert_eq!(f.marks.xmin(), TransactionId::INVALID);
    }

    #[test]
    fn test_release_keeps_requested_xmin() {
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.set_xmin(handle, TransactionId(50)).unwrap();
        f.table.sync_effective_horizons(handle).unwrap();
        f.table.release(handle).unwrap();

        assert_eq!(f.table.info(handle).unwrap().effective_xmin, TransactionId(50));
        assert_eq!(f.marks.xmin(), TransactionId(50));
    }

    #[test]
    fn test_release_drops_ephemeral() {
        let f = fixture(2);
        let handle = match f
            .table
            .create("eph", SlotPersistency::Ephemeral, false, None, Lsn(1))
            .unwrap()
        {
            CreateOutcome::Created(h) => h,
            CreateOutcome::Exists => unreachable!(),
        };

        f.table.release(handle).unwrap();
        assert!(!f.table.find("eph").unwrap());
        assert!(!f.table.store().slot_dir_exists(&SlotName::new("eph").unwrap()));
    }

    // ===== Drop Tests =====

    #[test]
    fn test_drop_removes_slot() {
        let f = fixture(2);
        let handle = create(&f.table, "s1", None);
        f.table.release(handle).unwrap();

        f.table.drop_slot("s1").unwrap();
        assert!(!f.table.find("s1").unwrap());
        let name = SlotName::new("s1").unwrap();
        assert!(!f.table.store().slot_dir_exists(&name));
        assert!(!f.table.store().tmp_dir(&name).exists());

        // the entry is reusable
        create(&f.table, "s1", None);
    }

    #[test]
    fn test_drop_active_logical_conflicts() {
        let f = fixture(2);
        create(&f.table, "logi", db());
        assert!(f.table.drop_slot("logi").unwrap_err().is_conflict());
        assert!(f.table.find("logi").unwrap());
    }

    #[test]
    fn test_drop_logical_is_logged() {
        let f = fixture(4);
        let logical = create(&f.table, "logi", db());
        let physical = create(&f.table, "phys", None);
        f.table.release(logical).unwrap();
        f.table.release(physical).unwrap();

        f.table.drop_slot("phys").unwrap();
        f.table.drop_slot("logi").unwrap();
        assert_eq!(f.server.logged_drops(), vec![SlotName::new("logi").unwrap()]);
    }

    #[test]
    fn test_drop_logical_in_recovery_not_logged() {
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.release(handle).unwrap();
        f.server.set_recovery_in_progress(true);

        f.table.drop_slot("logi").unwrap();
        assert!(f.server.logged_drops().is_empty());
    }

    #[test]
    fn test_drop_rename_failure_keeps_persistent_slot() {
        let f = fixture(2);
        let handle = create(&f.table, "s1", None);
        let name = SlotName::new("s1").unwrap();
        std::fs::remove_dir_all(f.table.store().slot_dir(&name)).unwrap();

        let err = f.table.drop_acquired(handle).unwrap_err();
        assert!(matches!(err, SlotError::Io { .. }));
        assert!(f.table.find("s1").unwrap(), "slot survives a failed drop");
        assert!(!f.table.info(handle).unwrap().active, "but is no longer owned");
        assert!(!f.table.is_poisoned());
    }

    #[test]
    fn test_drop_rename_failure_ephemeral_is_soft() {
        let f = fixture(2);
        let handle = match f
            .table
            .create("eph", SlotPersistency::Ephemeral, false, None, Lsn(1))
            .unwrap()
        {
            CreateOutcome::Created(h) => h,
            CreateOutcome::Exists => unreachable!(),
        };
        std::fs::remove_dir_all(f.table.store().slot_dir(&SlotName::new("eph").unwrap())).unwrap();

        f.table.drop_acquired(handle).unwrap();
        assert!(!f.table.find("eph").unwrap());
    }

    #[test]
    fn test_handle_goes_stale_after_drop() {
        let f = fixture(1);
        let stale = create(&f.table, "p", None);

        // dropped from under its owner, then the entry is reused
        f.table.drop_slot("p").unwrap();
        let fresh = match f
            .table
            .create("q", SlotPersistency::Ephemeral, false, None, Lsn(50))
            .unwrap()
        {
            CreateOutcome::Created(h) => h,
            CreateOutcome::Exists => unreachable!(),
        };
        assert_eq!(stale.index(), fresh.index());

        assert!(matches!(
            f.table.set_restart_lsn(stale, Lsn(1)),
            Err(SlotError::NoSlotBound)
        ));
        assert!(matches!(f.table.mark_dirty(stale), Err(SlotError::NoSlotBound)));
        assert!(matches!(f.table.save(stale), Err(SlotError::NoSlotBound)));
        assert!(matches!(f.table.info(stale), Err(SlotError::NoSlotBound)));
        assert!(matches!(f.table.drop_acquired(stale), Err(SlotError::NoSlotBound)));
        f.table.release(stale).unwrap();

        let info = f.table.info(fresh).unwrap();
        assert!(info.active, "release through a stale handle is a no-op");
        assert_eq!(info.data.restart_lsn, Lsn(50));
        assert!(f.table.find("q").unwrap());
    }

    #[test]
    fn test_handle_goes_stale_after_same_name_recreate() {
        let f = fixture(2);
        let stale = create(&f.table, "p", None);
        f.table.drop_slot("p").unwrap();
        let fresh = create(&f.table, "p", None);

        assert_ne!(stale, fresh);
        assert!(f.table.info(stale).is_err());
        assert!(f.table.info(fresh).unwrap().active);
    }

    // ===== Persistence Tests =====

    #[test]
    fn test_save_writes_once() {
        let f = fixture(2);
        let handle = create(&f.table, "s1", None);
        let state = f
            .table
            .store()
            .slot_dir(&SlotName::new("s1").unwrap())
            .join("state");

        f.table.set_restart_lsn(handle, Lsn(4096)).unwrap();
        f.table.save(handle).unwrap();
        assert!(!f.table.info(handle).unwrap().dirty);
        let modified = std::fs::metadata(&state).unwrap().modified().unwrap();

        f.table.save(handle).unwrap();
        assert_eq!(
            std::fs::metadata(&state).unwrap().modified().unwrap(),
            modified,
            "clean slot is not rewritten"
        );
    }

    #[test]
    fn test_save_recreates_missing_dir() {
        let f = fixture(2);
        let handle = create(&f.table, "s1", None);
        let name = SlotName::new("s1").unwrap();
        std::fs::remove_dir_all(f.table.store().slot_dir(&name)).unwrap();

        f.table.save(handle).unwrap();
        assert!(f.table.store().slot_dir_exists(&name));
    }

    #[test]
    fn test_make_persistent() {
        let f = fixture(2);
        let handle = match f
            .table
            .create("doe", SlotPersistency::DropOnError, false, db(), Lsn(1))
            .unwrap()
        {
            CreateOutcome::Created(h) => h,
            CreateOutcome::Exists => unreachable!(),
        };

        f.table.make_persistent(handle).unwrap();
        let info = f.table.info(handle).unwrap();
        assert_eq!(info.data.persistency, SlotPersistency::Persistent);
        assert!(!info.dirty);

        let loaded = f
            .table
            .store()
            .load_slot(&SlotName::new("doe").unwrap())
            .unwrap();
        assert!(matches!(
            loaded,
            replslot_durability::LoadOutcome::Restored { .. }
        ));
    }

    #[test]
    fn test_invalidate_dummy_standby_lsn() {
        let f = fixture(4);
        let regular = create(&f.table, "regular", None);
        let dummy = match f
            .table
            .create("dummy", SlotPersistency::Persistent, true, None, Lsn(300))
            .unwrap()
        {
            CreateOutcome::Created(h) => h,
            CreateOutcome::Exists => unreachable!(),
        };

        assert!(!f.table.invalidate_dummy_standby_lsn(regular).unwrap());
        assert!(f.table.invalidate_dummy_standby_lsn(dummy).unwrap());
        assert!(!f.table.invalidate_dummy_standby_lsn(dummy).unwrap(), "already invalid");

        let info = f.table.info(dummy).unwrap();
        assert_eq!(info.data.restart_lsn, Lsn::INVALID);
        assert!(info.dirty);
        assert_eq!(f.marks.min_required_lsn(), Lsn(100));
    }

    #[test]
    fn test_flush_all_writes_dirty_slots() {
        let f = fixture(4);
        let a = create(&f.table, "a", None);
        let b = create(&f.table, "b", None);
        create(&f.table, "c", None);

        assert_eq!(f.table.flush_all().unwrap(), 0, "freshly created slots are clean");

        f.table.set_restart_lsn(a, Lsn(200)).unwrap();
        f.table.set_xmin(b, TransactionId(9)).unwrap();
        assert_eq!(f.table.flush_all().unwrap(), 2);
        assert_eq!(f.table.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_restore_capacity() {
        let f = fixture(1);
        let data = |name: &str| SlotData::new(
            SlotName::new(name).unwrap(),
            SlotPersistency::Persistent,
            false,
            None,
            Lsn(1),
        );

        f.table.restore(data("a")).unwrap();
        let err = f.table.restore(data("b")).unwrap_err();
        assert!(matches!(err, SlotError::CapacityExceededOnRestore { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_poisoned_table_refuses_work() {
        let f = fixture(2);
        f.table.poisoned.store(true, Ordering::Release);

        let err = f
            .table
            .create("s1", SlotPersistency::Persistent, false, None, Lsn(0))
            .unwrap_err();
        assert!(matches!(err, SlotError::Poisoned));
        assert!(matches!(f.table.flush_all(), Err(SlotError::Poisoned)));
        assert!(f.table.find("s1").is_ok(), "read-only scans still work");
    }

    // ===== Concurrency Tests =====

    #[test]
    fn test_concurrent_create_fills_capacity_exactly() {
        const THREADS: usize = 8;
        const CAPACITY: usize = 5;
        let f = fixture(CAPACITY);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let table = f.table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    table.create(
                        &format!("slot_{}", i),
                        SlotPersistency::Persistent,
                        false,
                        None,
                        Lsn(1),
                    )
                })
            })
            .collect();

        let mut created = 0;
        let mut full = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(CreateOutcome::Created(_)) => created += 1,
                Err(SlotError::CapacityExceeded { .. }) => full += 1,
                other => panic!("unexpected result {:?}", other),
            }
        }
        assert_eq!(created, CAPACITY);
        assert_eq!(full, THREADS - CAPACITY);

        let names: HashSet<_> = f.table.slots().into_iter().map(|s| s.data.name).collect();
        assert_eq!(names.len(), CAPACITY, "no entry handed out twice");
    }

    #[test]
    fn test_concurrent_logical_create_same_name() {
        const THREADS: usize = 6;
        let f = fixture(THREADS);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = f.table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    table.create("shared", SlotPersistency::Persistent, false, db(), Lsn(1))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(SlotError::DuplicateName(_))))
            .count();
        assert_eq!(created, 1);
        assert_eq!(duplicates, THREADS - 1);
    }

    #[test]
    fn test_concurrent_acquire_logical_single_owner() {
        const THREADS: usize = 6;
        let f = fixture(2);
        let handle = create(&f.table, "logi", db());
        f.table.release(handle).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = f.table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    table.acquire("logi", false)
                })
            })
            .collect();

        let owners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(owners, 1, "exactly one session may own a logical slot");
    }

    #[test]
    fn test_concurrent_updates_and_checkpoints() {
        const ROUNDS: u64 = 50;
        let f = fixture(3);
        let handles: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| create(&f.table, name, None))
            .collect();
        let barrier = Arc::new(Barrier::new(handles.len() + 1));

        let writers: Vec<_> = handles
            .iter()
            .map(|&handle| {
                let table = f.table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for round in 1..=ROUNDS {
                        table.set_restart_lsn(handle, Lsn(round * 10)).unwrap();
                        table.save(handle).unwrap();
                    }
                })
            })
            .collect();

        let checkpointer = {
            let table = f.table.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    table.flush_all().unwrap();
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        checkpointer.join().unwrap();

        for info in f.table.slots() {
            let loaded = f.table.store().load_slot(&info.data.name).unwrap();
            match loaded {
                replslot_durability::LoadOutcome::Restored { data, .. } => {
                    assert_eq!(data.restart_lsn, Lsn(ROUNDS * 10));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
