//! Error types for slot operations
//!
//! Every layer of the workspace reports failures as a [`SlotError`]. The
//! variants follow the slot lifecycle: name validation, lookup and ownership
//! conflicts, capacity, disk I/O, record corruption at startup, and the
//! unrecoverable crash-section failures.
//!
//! Some operations let the caller choose how loudly an I/O failure is
//! reported. That choice is an [`ErrorLevel`]: `Warning` logs the error and
//! carries on, `Error` hands it back to the caller.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by slot operations.
#[derive(Debug, Error)]
pub enum SlotError {
    /// Slot name is empty, too long, or contains an illegal character
    #[error("replication slot name \"{name}\" is invalid: {reason}")]
    NameInvalid {
        /// The offending name
        name: String,
        /// Why the name was rejected
        reason: String,
    },

    /// A slot with this name already exists
    #[error("replication slot \"{0}\" already exists")]
    DuplicateName(String),

    /// No in-use slot carries this name
    #[error("replication slot \"{0}\" does not exist")]
    NotFound(String),

    /// The slot is owned by another session and cannot be taken over
    #[error("replication slot \"{0}\" is already active")]
    AlreadyActive(String),

    /// Every entry of the slot table is in use
    #[error("all replication slots are in use (capacity {capacity})")]
    CapacityExceeded {
        /// Configured table capacity
        capacity: usize,
    },

    /// More slots on disk than the table can hold
    #[error("too many replication slots on disk: \"{name}\" does not fit (capacity {capacity})")]
    CapacityExceededOnRestore {
        /// Configured table capacity
        capacity: usize,
        /// First slot that could not be restored
        name: String,
    },

    /// Create, write, fsync, rename or read failure
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted, including the path
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// On-disk record failed checksum, magic, length or version validation
    #[error("replication slot file \"{}\" is corrupt: {reason}", path.display())]
    CorruptRecord {
        /// File that failed validation
        path: PathBuf,
        /// Which check failed
        reason: String,
    },

    /// Slots cannot be used with the current configuration
    #[error("replication slots are not available: {0}")]
    NotConfigured(String),

    /// The session already owns a slot
    #[error("session already owns replication slot \"{0}\"")]
    SessionBusy(String),

    /// The session does not own a slot
    #[error("session does not own a replication slot")]
    NoSlotBound,

    /// An fsync after a durable rename failed; on-disk state is unknown
    #[error("critical: {context}: {source}")]
    Critical {
        /// What was being made durable
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A previous critical failure left the slot table unusable
    #[error("replication slot table is unusable after a critical failure; restart required")]
    Poisoned,
}

/// Result type for slot operations.
pub type Result<T> = std::result::Result<T, SlotError>;

impl SlotError {
    /// Build an [`SlotError::Io`] with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SlotError::Io {
            context: context.into(),
            source,
        }
    }

    /// Build a [`SlotError::Critical`] with context.
    pub fn critical(context: impl Into<String>, source: io::Error) -> Self {
        SlotError::Critical {
            context: context.into(),
            source,
        }
    }

    /// Build a [`SlotError::CorruptRecord`].
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SlotError::CorruptRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`SlotError::NameInvalid`].
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        SlotError::NameInvalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SlotError::NotFound(_))
    }

    /// Check if this is a naming or ownership conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SlotError::DuplicateName(_) | SlotError::AlreadyActive(_)
        )
    }

    /// Check if this error came from a crash section.
    pub fn is_critical(&self) -> bool {
        matches!(self, SlotError::Critical { .. } | SlotError::Poisoned)
    }

    /// Check if the process must not continue with the current slot state.
    ///
    /// Startup corruption and capacity problems, as well as crash-section
    /// failures, fall in this class.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SlotError::CorruptRecord { .. }
                | SlotError::CapacityExceededOnRestore { .. }
                | SlotError::Critical { .. }
                | SlotError::Poisoned
        )
    }
}

/// Severity at which a recoverable failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Log the failure and continue
    Warning,
    /// Return the failure to the caller
    Error,
}

impl ErrorLevel {
    /// Report `err` at this level.
    ///
    /// Critical errors are always returned, whatever the level.
    pub fn report(self, err: SlotError) -> Result<()> {
        match self {
            ErrorLevel::Warning if !err.is_critical() => {
                tracing::warn!(error = %err, "replication slot operation failed");
                Ok(())
            }
            _ => Err(err),
        }
    }
}
