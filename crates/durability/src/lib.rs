//! Durability layer for replslot
//!
//! This crate puts replication slots on disk and reads them back:
//! - Record format: fixed-size slot record with CRC32 checksum
//! - Slot directories: create via `<name>.tmp` rename, drop via the reverse
//! - Conditional save: backup, temp file, rename, fsync
//! - Load: primary record with a single fallback to the backup copy
//! - Crash sections: post-rename fsync failures are critical

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod fs;
pub mod store;

pub use format::{decode_slot_record, encode_slot_record, SlotRecordError, SLOT_RECORD_SIZE};
pub use store::{LoadOutcome, PersistentSlot, SlotDirEntry, SlotStore, SLOT_BASE_DIR};
