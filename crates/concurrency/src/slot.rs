//! One entry of the slot table
//!
//! A [`ReplicationSlot`] is allocated once, when the table is built, and
//! recycled through its `in_use` flag. All mutable fields live behind the
//! short-hold fast-path mutex; disk access is serialized separately on the
//! I/O mutex so a slow fsync never blocks readers of the fields.

use parking_lot::{Mutex, MutexGuard};
use replslot_core::{SlotCandidates, SlotData, SlotName, TransactionId};
use replslot_durability::PersistentSlot;
use std::sync::atomic::{AtomicBool, Ordering};

/// Mutable part of a slot, guarded by the fast-path lock
#[derive(Debug)]
pub(crate) struct SlotState {
    pub data: SlotData,
    pub active: bool,
    pub dirty: bool,
    pub just_dirtied: bool,
    pub effective_xmin: TransactionId,
    pub effective_catalog_xmin: TransactionId,
    pub candidates: SlotCandidates,
    /// Bumped every time the entry is claimed or freed
    pub generation: u64,
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState {
            data: SlotData::vacant(),
            active: false,
            dirty: false,
            just_dirtied: false,
            effective_xmin: TransactionId::INVALID,
            effective_catalog_xmin: TransactionId::INVALID,
            candidates: SlotCandidates::default(),
            generation: 0,
        }
    }
}

impl SlotState {
    /// Reset every in-memory field around freshly created data.
    pub fn reset(&mut self, data: SlotData) {
        *self = SlotState {
            data,
            generation: self.generation,
            ..SlotState::default()
        };
    }

    /// Install data read back from disk.
    pub fn restore(&mut self, data: SlotData) {
        let effective_xmin = data.xmin;
        let effective_catalog_xmin = data.catalog_xmin;
        *self = SlotState {
            data,
            effective_xmin,
            effective_catalog_xmin,
            generation: self.generation,
            ..SlotState::default()
        };
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.just_dirtied = true;
    }

    pub fn info(&self) -> SlotInfo {
        SlotInfo {
            data: self.data.clone(),
            active: self.active,
            dirty: self.dirty,
            effective_xmin: self.effective_xmin,
            effective_catalog_xmin: self.effective_catalog_xmin,
            candidates: self.candidates,
        }
    }
}

/// A slot table entry
#[derive(Debug)]
pub struct ReplicationSlot {
    in_use: AtomicBool,
    state: Mutex<SlotState>,
    io_lock: Mutex<()>,
}

impl ReplicationSlot {
    pub(crate) fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            state: Mutex::new(SlotState::default()),
            io_lock: Mutex::new(()),
        }
    }

    /// Whether the entry currently holds a slot
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Claim or free the entry, starting a new generation
    ///
    /// Only called with the scan lock held exclusively; `state` is this
    /// slot's fast-path guard. Returns the new generation.
    pub(crate) fn set_in_use(&self, state: &mut SlotState, in_use: bool) -> u64 {
        state.generation = state.generation.wrapping_add(1);
        self.in_use.store(in_use, Ordering::Release);
        state.generation
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }
}

impl PersistentSlot for ReplicationSlot {
    fn slot_name(&self) -> SlotName {
        self.lock().data.name.clone()
    }

    fn begin_save(&self) -> bool {
        let mut state = self.lock();
        state.just_dirtied = false;
        state.dirty
    }

    fn force_dirty(&self) {
        self.lock().mark_dirty();
    }

    fn snapshot(&self) -> SlotData {
        self.lock().data.clone()
    }

    fn finish_save(&self) {
        let mut state = self.lock();
        if !state.just_dirtied {
            state.dirty = false;
        }
    }

    fn io_lock(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock()
    }
}

/// Point-in-time copy of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Persistent fields
    pub data: SlotData,
    /// Owned by a session
    pub active: bool,
    /// Changed since the last save
    pub dirty: bool,
    /// Data horizon currently enforced
    pub effective_xmin: TransactionId,
    /// Catalog horizon currently enforced
    pub effective_catalog_xmin: TransactionId,
    /// Staged advancement values
    pub candidates: SlotCandidates,
}

/// Opaque reference to a slot bound to a session
///
/// Carries the entry's generation at the time it was handed out. Once the
/// slot is dropped the handle goes stale, even if the entry is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    generation: u64,
}

impl SlotHandle {
    pub(crate) fn new(index: usize, generation: u64) -> Self {
        SlotHandle { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index
    }

    pub(crate) fn generation(self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replslot_core::{Lsn, SlotPersistency};

    fn data() -> SlotData {
        SlotData {
            name: SlotName::new("s1").unwrap(),
            persistency: SlotPersistency::Persistent,
            database: None,
            xmin: TransactionId(10),
            catalog_xmin: TransactionId(7),
            restart_lsn: Lsn(500),
            is_dummy_standby: false,
        }
    }

    #[test]
    fn test_restore_copies_horizons() {
        let slot = ReplicationSlot::new();
        slot.lock().candidates.restart_lsn = Lsn(9);
        slot.lock().restore(data());

        let info = slot.lock().info();
        assert_eq!(info.effective_xmin, TransactionId(10));
        assert_eq!(info.effective_catalog_xmin, TransactionId(7));
        assert_eq!(info.candidates, SlotCandidates::default());
        assert!(!info.active);
        assert!(!info.dirty);
    }

    #[test]
    fn test_generation_survives_reset() {
        let slot = ReplicationSlot::new();
        let first = {
            let mut state = slot.lock();
            state.reset(data());
            slot.set_in_use(&mut state, true)
        };
        assert!(slot.in_use());

        let freed = slot.set_in_use(&mut slot.lock(), false);
        assert_ne!(freed, first);

        slot.lock().reset(data());
        assert_eq!(slot.lock().generation, freed);
        slot.lock().restore(data());
        assert_eq!(slot.lock().generation, freed);
    }

    #[test]
    fn test_change_during_save_keeps_dirty() {
        let slot = ReplicationSlot::new();
        slot.lock().reset(data());
        slot.force_dirty();

        assert!(slot.begin_save());
        // a concurrent owner update between snapshot and completion
        slot.lock().mark_dirty();
        slot.finish_save();
        assert!(slot.lock().dirty, "update after begin_save must not be lost");

        assert!(slot.begin_save());
        slot.finish_save();
        assert!(!slot.lock().dirty);
        assert!(!slot.begin_save());
    }
}
