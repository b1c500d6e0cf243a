//! Per-session slot binding
//!
//! A [`SlotSession`] is the execution context that owns at most one slot at
//! a time. Operations on "my slot" go through it; creating or acquiring a
//! second slot while one is bound is refused. Dropping the session releases
//! the bound slot.

use crate::slot::{SlotHandle, SlotInfo};
use crate::table::{CreateOutcome, SlotTable};
use replslot_core::{
    DatabaseId, Lsn, Result, SlotCandidates, SlotError, SlotPersistency, TransactionId,
};
use std::sync::Arc;

/// Execution context owning at most one slot
#[derive(Debug)]
pub struct SlotSession {
    table: Arc<SlotTable>,
    slot: Option<SlotHandle>,
    logical_decoding: bool,
}

impl SlotSession {
    /// Session with no slot bound
    pub fn new(table: Arc<SlotTable>) -> Self {
        Self {
            table,
            slot: None,
            logical_decoding: false,
        }
    }

    /// The table this session works on
    pub fn table(&self) -> &Arc<SlotTable> {
        &self.table
    }

    /// Whether a slot is bound
    pub fn is_bound(&self) -> bool {
        self.slot.is_some()
    }

    /// Whether the session is running logical decoding
    pub fn in_logical_decoding(&self) -> bool {
        self.logical_decoding
    }

    /// Flag the session as running logical decoding; cleared on release.
    pub fn set_logical_decoding(&mut self, logical_decoding: bool) {
        self.logical_decoding = logical_decoding;
    }

    /// A binding whose slot was dropped elsewhere does not count.
    fn ensure_unbound(&self) -> Result<()> {
        match self.slot.map(|handle| self.table.info(handle)) {
            Some(Ok(info)) => Err(SlotError::SessionBusy(info.data.name.to_string())),
            _ => Ok(()),
        }
    }

    fn bound(&self) -> Result<SlotHandle> {
        self.slot.ok_or(SlotError::NoSlotBound)
    }

    /// Create a slot and bind it
    ///
    /// If a physical slot of that name already exists it is acquired
    /// instead, with a warning.
    pub fn create(
        &mut self,
        name: &str,
        persistency: SlotPersistency,
        is_dummy_standby: bool,
        database: Option<DatabaseId>,
        restart_lsn: Lsn,
    ) -> Result<()> {
        self.ensure_unbound()?;
        self.table.check_requirements()?;

        let handle = match self.table.create(
            name,
            persistency,
            is_dummy_standby,
            database,
            restart_lsn,
        )? {
            CreateOutcome::Created(handle) => handle,
            CreateOutcome::Exists => self.table.acquire(name, is_dummy_standby)?,
        };
        self.slot = Some(handle);
        Ok(())
    }

    /// Bind an existing slot.
    pub fn acquire(&mut self, name: &str, is_dummy_standby: bool) -> Result<()> {
        self.ensure_unbound()?;
        self.slot = Some(self.table.acquire(name, is_dummy_standby)?);
        Ok(())
    }

    /// Unbind the slot, dropping it if it is ephemeral
    ///
    /// Does nothing if no slot is bound. The binding and the logical
    /// decoding flag are cleared even when the release fails.
    pub fn release(&mut self) -> Result<()> {
        let handle = self.slot.take();
        self.logical_decoding = false;
        match handle {
            Some(handle) => self.table.release(handle),
            None => Ok(()),
        }
    }

    /// Drop a slot by name; this session must not own one.
    pub fn drop_slot(&mut self, name: &str) -> Result<()> {
        self.ensure_unbound()?;
        self.table.drop_slot(name)
    }

    /// Drop the bound slot.
    pub fn drop_acquired(&mut self) -> Result<()> {
        let handle = self.slot.take().ok_or(SlotError::NoSlotBound)?;
        self.table.drop_acquired(handle)
    }

    /// Flag the bound slot for the next save.
    pub fn mark_dirty(&self) -> Result<()> {
        self.table.mark_dirty(self.bound()?)
    }

    /// Make the bound slot's state durable now.
    pub fn save(&self) -> Result<()> {
        self.table.save(self.bound()?)
    }

    /// Turn the bound slot persistent and save it.
    pub fn make_persistent(&self) -> Result<()> {
        self.table.make_persistent(self.bound()?)
    }

    /// Forget the bound dummy-standby slot's restart position.
    pub fn invalidate_dummy_standby_lsn(&self) -> Result<bool> {
        self.table.invalidate_dummy_standby_lsn(self.bound()?)
    }

    /// Move the bound slot's restart position.
    pub fn set_restart_lsn(&self, restart_lsn: Lsn) -> Result<()> {
        self.table.set_restart_lsn(self.bound()?, restart_lsn)
    }

    /// Set the bound slot's requested data horizon.
    pub fn set_xmin(&self, xmin: TransactionId) -> Result<()> {
        self.table.set_xmin(self.bound()?, xmin)
    }

    /// Set the bound slot's requested catalog horizon.
    pub fn set_catalog_xmin(&self, catalog_xmin: TransactionId) -> Result<()> {
        self.table.set_catalog_xmin(self.bound()?, catalog_xmin)
    }

    /// Enforce the bound slot's requested horizons.
    pub fn sync_effective_horizons(&self) -> Result<()> {
        self.table.sync_effective_horizons(self.bound()?)
    }

    /// Hold back the data horizon for an exported snapshot until release.
    pub fn set_exported_snapshot_xmin(&self, xmin: TransactionId) -> Result<()> {
        self.table.set_exported_snapshot_xmin(self.bound()?, xmin)
    }

    /// Stage advancement values on the bound slot.
    pub fn set_candidates(&self, candidates: SlotCandidates) -> Result<()> {
        self.table.set_candidates(self.bound()?, candidates)
    }

    /// Copy of the bound slot.
    pub fn info(&self) -> Result<SlotInfo> {
        self.table.info(self.bound()?)
    }
}

impl Drop for SlotSession {
    fn drop(&mut self) {
        if self.slot.is_none() {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "failed to release replication slot on session exit");
        }
    }
}
