//! Shared helpers for replslot integration tests

#![allow(dead_code)]

use replslot::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Data directory that outlives manager restarts within one test
pub struct TestDataDir {
    pub dir: TempDir,
}

impl TestDataDir {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `pg_replslot` under the data directory
    pub fn slot_base(&self) -> PathBuf {
        self.path().join(replslot::durability::SLOT_BASE_DIR)
    }

    pub fn state_file(&self, slot: &str) -> PathBuf {
        self.slot_base().join(slot).join("state")
    }

    pub fn backup_file(&self, slot: &str) -> PathBuf {
        self.slot_base().join(slot).join("state.backup")
    }

    /// Open a manager with logical WAL and the given capacity
    pub fn open(&self, capacity: usize) -> Result<SlotManager> {
        SlotManager::builder()
            .data_dir(self.path())
            .max_replication_slots(capacity)
            .wal_level(WalLevel::Logical)
            .open()
    }
}

/// Create a persistent slot, move it to `restart_lsn`, save and release it
pub fn create_saved(
    manager: &SlotManager,
    name: &str,
    database: Option<DatabaseId>,
    restart_lsn: Lsn,
) {
    let mut session = manager.session();
    session
        .create(name, SlotPersistency::Persistent, false, database, restart_lsn)
        .unwrap();
    session.save().unwrap();
    session.release().unwrap();
}

/// Flip one byte of a file
pub fn corrupt_byte(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    std::fs::write(path, bytes).unwrap();
}
