//! Convenient imports for replslot.
//!
//! ```no_run
//! use replslot::prelude::*;
//!
//! let manager = SlotManager::open("./data")?;
//! manager.checkpoint()?;
//! # Ok::<(), SlotError>(())
//! ```

// Main entry point
pub use crate::{SlotConfig, SlotManager, SlotManagerBuilder};

// Error handling
pub use crate::{ErrorLevel, Result, SlotError};

// Sessions and results
pub use crate::{LsnWatermark, SlotInfo, SlotSession};

// Core types
pub use crate::{DatabaseId, Lsn, SlotName, SlotPersistency, TransactionId, WalLevel};

// Collaborators
pub use crate::{PublishedWatermarks, RetentionSink, ServerMode, ServerState, StaticServerState};
