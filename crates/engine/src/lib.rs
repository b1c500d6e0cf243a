//! Engine layer for replslot
//!
//! This crate drives the slot subsystem as a whole:
//! - SlotConfig: TOML-backed settings (data dir, capacity, WAL level)
//! - SlotRecovery: startup scan, leftover cleanup, restore, first watermarks
//! - SlotManager: builder-configured entry point handing out sessions and
//!   running checkpoints

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod manager;
pub mod recovery;

pub use config::{ConfigError, SlotConfig, DEFAULT_MAX_REPLICATION_SLOTS};
pub use manager::{SlotManager, SlotManagerBuilder};
pub use recovery::{RecoveryReport, SlotRecovery};
