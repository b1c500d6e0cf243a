//! Core types for replication slots
//!
//! This module defines the fundamental types used throughout the system:
//! - [`Lsn`]: a position in the write-ahead log
//! - [`TransactionId`]: a transaction horizon
//! - [`DatabaseId`]: the database a logical slot is scoped to
//! - [`SlotName`]: a validated slot name
//! - [`SlotData`]: the persistent part of a slot, as stored on disk

use crate::error::{ErrorLevel, Result, SlotError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the on-disk name field; names hold at most `NAME_DATA_LEN - 1` bytes.
pub const NAME_DATA_LEN: usize = 64;

/// Characters that may never appear in a name supplied from outside.
const DANGEROUS_NAME_CHARS: &[char] = &[';', '`', '\\', '\'', '"', '>', '<', '&', '|', '!', '\n'];

/// Position in the write-ahead log
///
/// Zero is reserved as "no position" ([`Lsn::INVALID`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The invalid position, meaning "no constraint"
    pub const INVALID: Lsn = Lsn(0);

    /// Check if this is a real WAL position
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Lsn {
    /// Display as `HI/LO` in hex, the way WAL positions are usually printed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

/// Transaction id used as a retention horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The invalid transaction id, meaning "no constraint"
    pub const INVALID: TransactionId = TransactionId(0);

    /// Check if this is a real transaction id
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Check if `self` is older than `other`
    pub fn precedes(&self, other: TransactionId) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the database a logical slot decodes
///
/// The raw value zero is reserved for "no database" and cannot be wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseId(u32);

impl DatabaseId {
    /// Wrap a raw id; returns `None` for zero
    pub fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(DatabaseId(raw))
        }
    }

    /// Raw id
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Crash behaviour of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotPersistency {
    /// Survives restarts
    Persistent,
    /// Dropped when released; never survives a restart
    Ephemeral,
    /// Dropped if creation fails midway; converted to persistent once safe
    DropOnError,
}

impl SlotPersistency {
    /// On-disk encoding
    pub fn to_raw(self) -> u32 {
        match self {
            SlotPersistency::Persistent => 0,
            SlotPersistency::Ephemeral => 1,
            SlotPersistency::DropOnError => 2,
        }
    }

    /// Decode the on-disk encoding
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SlotPersistency::Persistent),
            1 => Some(SlotPersistency::Ephemeral),
            2 => Some(SlotPersistency::DropOnError),
            _ => None,
        }
    }
}

/// Local role of the server, as far as slot retention cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Single node, no replication role
    Normal,
    /// Streaming primary
    Primary,
    /// Standby receiving WAL
    Standby,
    /// Role not yet decided
    Pending,
    /// Standby feeding other standbys
    CascadeStandby,
}

impl ServerMode {
    /// Whether physical slots hold back WAL in this mode
    ///
    /// Only a primary (or a node that may still become one) keeps WAL for
    /// physical consumers; elsewhere only logical slots count.
    pub fn retains_physical_slots(&self) -> bool {
        matches!(self, ServerMode::Primary | ServerMode::Pending)
    }
}

/// Amount of information written to WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalLevel {
    /// Crash recovery only
    Minimal,
    /// Enough for archiving and physical replication
    Archive,
    /// Enough for read-only standbys
    HotStandby,
    /// Enough for logical decoding
    Logical,
}

impl Default for WalLevel {
    fn default() -> Self {
        WalLevel::HotStandby
    }
}

/// Validated replication slot name
///
/// Names are 1..=63 bytes of `[a-z0-9_]` plus the punctuation `? < ! - .`
/// reserved for internally generated names. A name doubles as a directory
/// name, so the charset has to be portable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotName(String);

impl SlotName {
    /// Validate and wrap a name
    ///
    /// # Examples
    ///
    /// ```
    /// use replslot_core::SlotName;
    ///
    /// assert!(SlotName::new("standby_1").is_ok());
    /// assert!(SlotName::new("Standby").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_slot_name(&name, ErrorLevel::Error)?;
        Ok(SlotName(name))
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SlotName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_slot_name_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '?' | '<' | '!' | '-' | '.')
}

/// Check a slot name, reporting problems at `level`.
///
/// At [`ErrorLevel::Error`] an invalid name is returned as
/// [`SlotError::NameInvalid`]; at [`ErrorLevel::Warning`] it is logged and
/// `Ok(false)` is returned.
pub fn validate_slot_name(name: &str, level: ErrorLevel) -> Result<bool> {
    let reason = if name.is_empty() {
        Some("name is too short")
    } else if name.len() >= NAME_DATA_LEN {
        Some("name is too long")
    } else if !name.chars().all(is_slot_name_char) {
        Some("names may only contain lower case letters, numbers and the underscore character")
    } else {
        None
    };

    match reason {
        None => Ok(true),
        Some(reason) => level
            .report(SlotError::invalid_name(name, reason))
            .map(|()| false),
    }
}

/// Stricter check for names arriving from outside the process.
///
/// Rejects names of 63 bytes or more and names containing shell or quoting
/// metacharacters, on top of the usual emptiness check.
pub fn validate_external_slot_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SlotError::invalid_name(name, "name is too short"));
    }
    if name.len() >= NAME_DATA_LEN - 1 {
        return Err(SlotError::invalid_name(name, "name is too long"));
    }
    if name.contains(DANGEROUS_NAME_CHARS) {
        return Err(SlotError::invalid_name(name, "name contains an invalid character"));
    }
    Ok(())
}

/// Persistent part of a slot
///
/// This is exactly what the on-disk record carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotData {
    /// Slot name
    pub name: SlotName,
    /// Crash behaviour
    pub persistency: SlotPersistency,
    /// `Some` for logical slots
    pub database: Option<DatabaseId>,
    /// Oldest transaction whose tuples the consumer still needs
    pub xmin: TransactionId,
    /// Oldest transaction whose catalog tuples the consumer still needs
    pub catalog_xmin: TransactionId,
    /// Oldest WAL position the consumer still needs
    pub restart_lsn: Lsn,
    /// Placeholder for a non-streaming standby
    pub is_dummy_standby: bool,
}

impl Default for SlotPersistency {
    fn default() -> Self {
        SlotPersistency::Persistent
    }
}

impl SlotData {
    /// Fresh data for a slot about to be created
    pub fn new(
        name: SlotName,
        persistency: SlotPersistency,
        is_dummy_standby: bool,
        database: Option<DatabaseId>,
        restart_lsn: Lsn,
    ) -> Self {
        Self {
            name,
            persistency,
            database,
            xmin: TransactionId::INVALID,
            catalog_xmin: TransactionId::INVALID,
            restart_lsn,
            is_dummy_standby,
        }
    }

    /// Placeholder held by a table entry with no slot in it
    pub fn vacant() -> Self {
        Self::new(
            SlotName(String::from("vacant")),
            SlotPersistency::Persistent,
            false,
            None,
            Lsn::INVALID,
        )
    }

    /// Logical slots are scoped to a database
    pub fn is_logical(&self) -> bool {
        self.database.is_some()
    }
}

/// Staged advancement values for a logical slot
///
/// Logical decoding fills these in and commits them to `restart_lsn` /
/// `catalog_xmin` once confirmed; the table only stores and resets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotCandidates {
    /// Restart position waiting for confirmation
    pub restart_lsn: Lsn,
    /// Position at which `restart_lsn` becomes safe
    pub restart_valid: Lsn,
    /// Position at which `catalog_xmin` becomes safe
    pub xmin_lsn: Lsn,
    /// Catalog horizon waiting for confirmation
    pub catalog_xmin: TransactionId,
}
