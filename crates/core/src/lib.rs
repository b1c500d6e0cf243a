//! Core types for replslot
//!
//! This crate defines the vocabulary shared by every other layer:
//! - [`types`]: WAL positions, transaction ids, slot names, persistency
//! - [`error`]: the [`SlotError`] taxonomy and the caller-chosen [`ErrorLevel`]
//! - [`traits`]: collaborator seams ([`ServerState`], [`RetentionSink`])
//! - [`environment`]: in-process implementations of those collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod environment;
pub mod error;
pub mod traits;
pub mod types;

pub use environment::{PublishedWatermarks, StaticServerState};
pub use error::{ErrorLevel, Result, SlotError};
pub use traits::{RetentionSink, ServerState};
pub use types::{
    validate_external_slot_name, validate_slot_name, DatabaseId, Lsn, ServerMode, SlotCandidates,
    SlotData, SlotName, SlotPersistency, TransactionId, WalLevel, NAME_DATA_LEN,
};
