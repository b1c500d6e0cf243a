//! Concurrency layer for replslot
//!
//! This crate implements the shared slot table:
//! - SlotTable: fixed-capacity arena with allocation, scan, fast-path and
//!   I/O locks
//! - Create/Acquire/Release/Drop following the lock tier order
//! - SlotSession: binds at most one slot to an execution context
//! - Watermarks: oldest xmin and restart LSN range across in-use slots

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod session;
pub mod slot;
pub mod table;
pub mod watermark;

pub use session::SlotSession;
pub use slot::{ReplicationSlot, SlotHandle, SlotInfo};
pub use table::{CreateOutcome, SlotTable};
pub use watermark::LsnWatermark;
