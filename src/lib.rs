//! # replslot
//!
//! Crash-safe replication slot management for WAL-based storage engines.
//!
//! A replication slot is a durable, named marker that pins the oldest WAL
//! position and transaction horizon a replication consumer still needs.
//! Slots survive crashes, work on primaries and standbys, and can be
//! created, dropped and updated while other threads scan the slot set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use replslot::prelude::*;
//!
//! let manager = SlotManager::builder()
//!     .data_dir("./data")
//!     .wal_level(WalLevel::Logical)
//!     .open()?;
//!
//! let mut session = manager.session();
//! session.create("decoder", SlotPersistency::Persistent, false, DatabaseId::new(1), Lsn(0x1000))?;
//! session.set_restart_lsn(Lsn(0x2000))?;
//! session.save()?;
//! session.release()?;
//!
//! let watermark = manager.compute_required_lsn();
//! println!("WAL before {} may be recycled", watermark.min_required);
//! # Ok::<(), SlotError>(())
//! ```
//!
//! ## Layers
//!
//! - `replslot-core`: names, positions, errors, collaborator traits
//! - [`durability`]: record format and slot directories on disk
//! - [`concurrency`]: slot table, sessions, watermarks
//! - [`engine`]: configuration, startup recovery, the manager

#![warn(missing_docs)]

pub mod prelude;

pub use replslot_concurrency as concurrency;
pub use replslot_durability as durability;
pub use replslot_engine as engine;

// Re-export main entry points
pub use replslot_engine::{RecoveryReport, SlotConfig, SlotManager, SlotManagerBuilder};

// Re-export the slot API
pub use replslot_concurrency::{LsnWatermark, SlotInfo, SlotSession, SlotTable};
pub use replslot_core::{
    DatabaseId, ErrorLevel, Lsn, PublishedWatermarks, Result, RetentionSink, ServerMode,
    ServerState, SlotError, SlotName, SlotPersistency, StaticServerState, TransactionId, WalLevel,
};
