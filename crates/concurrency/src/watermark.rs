//! Aggregate watermarks over the slot table
//!
//! The retention subsystems never look at individual slots. They receive
//! the oldest transaction horizons and the restart LSN range through the
//! table's [`RetentionSink`](replslot_core::RetentionSink), recomputed here
//! whenever a slot appears, disappears, or moves its horizons.

use crate::table::SlotTable;
use replslot_core::{DatabaseId, Lsn, TransactionId};

/// Restart LSN range required by the slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LsnWatermark {
    /// Oldest valid restart LSN; WAL before it may be recycled
    pub min_required: Lsn,
    /// Newest restart LSN
    pub max_required: Lsn,
    /// At least one slot took part in the computation
    pub any_in_use: bool,
}

impl LsnWatermark {
    /// Fold one slot's restart LSN in.
    pub fn include(&mut self, restart_lsn: Lsn) {
        self.any_in_use = true;
        if restart_lsn.is_valid()
            && (!self.min_required.is_valid() || restart_lsn < self.min_required)
        {
            self.min_required = restart_lsn;
        }
        if self.max_required < restart_lsn {
            self.max_required = restart_lsn;
        }
    }
}

/// Keep the older of two transaction horizons, ignoring invalid ones.
fn older_xmin(current: TransactionId, candidate: TransactionId) -> TransactionId {
    if candidate.is_valid() && (!current.is_valid() || candidate.precedes(current)) {
        candidate
    } else {
        current
    }
}

impl SlotTable {
    /// Publish the oldest effective data and catalog horizons
    ///
    /// `already_locked` is passed through to the sink unchanged.
    pub fn compute_required_xmin(&self, already_locked: bool) -> (TransactionId, TransactionId) {
        let mut xmin = TransactionId::INVALID;
        let mut catalog_xmin = TransactionId::INVALID;

        {
            let _scan = self.control_lock.read();
            for slot in self.entries().iter().filter(|slot| slot.in_use()) {
                let state = slot.lock();
                xmin = older_xmin(xmin, state.effective_xmin);
                catalog_xmin = older_xmin(catalog_xmin, state.effective_catalog_xmin);
            }
        }

        self.sink
            .set_required_xmin(xmin, catalog_xmin, already_locked);
        (xmin, catalog_xmin)
    }

    /// Publish the restart LSN range
    ///
    /// Physical slots only hold back WAL on a primary (or a server about to
    /// become one); elsewhere only logical slots count.
    pub fn compute_required_lsn(&self) -> LsnWatermark {
        let mut watermark = LsnWatermark::default();
        if self.capacity() == 0 {
            return watermark;
        }

        let include_physical = self.server.server_mode().retains_physical_slots();
        {
            let _scan = self.control_lock.read();
            for slot in self.entries().iter().filter(|slot| slot.in_use()) {
                let state = slot.lock();
                if !include_physical && !state.data.is_logical() {
                    continue;
                }
                watermark.include(state.data.restart_lsn);
            }
        }

        self.sink
            .set_required_lsn(watermark.min_required, watermark.max_required);
        watermark
    }

    /// Oldest restart LSN of the logical slots
    ///
    /// Computed on demand and not published. [`Lsn::INVALID`] when there are
    /// no logical slots.
    pub fn compute_logical_restart_lsn(&self) -> Lsn {
        let _scan = self.control_lock.read();
        self.entries()
            .iter()
            .filter(|slot| slot.in_use())
            .filter_map(|slot| {
                let state = slot.lock();
                state.data.is_logical().then_some(state.data.restart_lsn)
            })
            .fold(Lsn::INVALID, |result, restart_lsn| {
                if !result.is_valid() || restart_lsn < result {
                    restart_lsn
                } else {
                    result
                }
            })
    }

    /// Number of logical slots on `database`, and how many are active.
    pub fn count_db_slots(&self, database: DatabaseId) -> (usize, usize) {
        let _scan = self.control_lock.read();
        self.entries()
            .iter()
            .filter(|slot| slot.in_use())
            .fold((0, 0), |(total, active), slot| {
                let state = slot.lock();
                if state.data.database != Some(database) {
                    (total, active)
                } else {
                    (total + 1, active + usize::from(state.active))
                }
            })
    }
}
