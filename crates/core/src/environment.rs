//! In-process collaborators
//!
//! [`StaticServerState`] and [`PublishedWatermarks`] are the default
//! implementations of the collaborator traits. They keep their values in
//! atomics so embedding code (and tests) can flip the server role or read the
//! last published watermark at any time.

use crate::traits::{RetentionSink, ServerState};
use crate::types::{Lsn, ServerMode, SlotName, TransactionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Server state held in memory
#[derive(Debug)]
pub struct StaticServerState {
    mode: AtomicU8,
    in_recovery: AtomicBool,
    running: AtomicBool,
    dropped_logical: Mutex<Vec<SlotName>>,
}

fn mode_to_u8(mode: ServerMode) -> u8 {
    match mode {
        ServerMode::Normal => 0,
        ServerMode::Primary => 1,
        ServerMode::Standby => 2,
        ServerMode::Pending => 3,
        ServerMode::CascadeStandby => 4,
    }
}

fn mode_from_u8(raw: u8) -> ServerMode {
    match raw {
        1 => ServerMode::Primary,
        2 => ServerMode::Standby,
        3 => ServerMode::Pending,
        4 => ServerMode::CascadeStandby,
        _ => ServerMode::Normal,
    }
}

impl StaticServerState {
    /// A running server in `mode`, not in recovery
    pub fn new(mode: ServerMode) -> Self {
        Self {
            mode: AtomicU8::new(mode_to_u8(mode)),
            in_recovery: AtomicBool::new(false),
            running: AtomicBool::new(true),
            dropped_logical: Mutex::new(Vec::new()),
        }
    }

    /// Change the server role
    pub fn set_mode(&self, mode: ServerMode) {
        self.mode.store(mode_to_u8(mode), Ordering::Release);
    }

    /// Enter or leave recovery
    pub fn set_recovery_in_progress(&self, in_recovery: bool) {
        self.in_recovery.store(in_recovery, Ordering::Release);
    }

    /// Mark the server as fully started or not
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Logical slot drops reported through [`ServerState::log_slot_drop`]
    pub fn logged_drops(&self) -> Vec<SlotName> {
        self.dropped_logical.lock().clone()
    }
}

impl Default for StaticServerState {
    fn default() -> Self {
        Self::new(ServerMode::Primary)
    }
}

impl ServerState for StaticServerState {
    fn server_mode(&self) -> ServerMode {
        mode_from_u8(self.mode.load(Ordering::Acquire))
    }

    fn recovery_in_progress(&self) -> bool {
        self.in_recovery.load(Ordering::Acquire)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn log_slot_drop(&self, name: &SlotName) {
        self.dropped_logical.lock().push(name.clone());
    }
}

/// Last watermarks published by the slot engine
#[derive(Debug, Default)]
pub struct PublishedWatermarks {
    xmin: AtomicU64,
    catalog_xmin: AtomicU64,
    min_lsn: AtomicU64,
    max_lsn: AtomicU64,
    xmin_publications: AtomicU64,
    lsn_publications: AtomicU64,
}

impl PublishedWatermarks {
    /// Nothing published yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published data horizon
    pub fn xmin(&self) -> TransactionId {
        TransactionId(self.xmin.load(Ordering::Acquire))
    }

    /// Last published catalog horizon
    pub fn catalog_xmin(&self) -> TransactionId {
        TransactionId(self.catalog_xmin.load(Ordering::Acquire))
    }

    /// Last published floor for WAL recycling
    pub fn min_required_lsn(&self) -> Lsn {
        Lsn(self.min_lsn.load(Ordering::Acquire))
    }

    /// Last published high-water mark
    pub fn max_required_lsn(&self) -> Lsn {
        Lsn(self.max_lsn.load(Ordering::Acquire))
    }

    /// Number of xmin publications so far
    pub fn xmin_publications(&self) -> u64 {
        self.xmin_publications.load(Ordering::Acquire)
    }

    /// Number of LSN publications so far
    pub fn lsn_publications(&self) -> u64 {
        self.lsn_publications.load(Ordering::Acquire)
    }
}

impl RetentionSink for PublishedWatermarks {
    fn set_required_xmin(
        &self,
        xmin: TransactionId,
        catalog_xmin: TransactionId,
        _already_locked: bool,
    ) {
        self.xmin.store(xmin.0, Ordering::Release);
        self.catalog_xmin.store(catalog_xmin.0, Ordering::Release);
        self.xmin_publications.fetch_add(1, Ordering::AcqRel);
    }

    fn set_required_lsn(&self, min_required: Lsn, max_required: Lsn) {
        self.min_lsn.store(min_required.0, Ordering::Release);
        self.max_lsn.store(max_required.0, Ordering::Release);
        self.lsn_publications.fetch_add(1, Ordering::AcqRel);
    }
}
