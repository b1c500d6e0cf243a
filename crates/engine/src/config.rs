//! Slot subsystem configuration
//!
//! ```toml
//! data_dir = "/var/lib/db"
//! max_replication_slots = 16
//! wal_level = "logical"
//! ```
//!
//! Every key is optional.

use replslot_core::WalLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default number of slot table entries
pub const DEFAULT_MAX_REPLICATION_SLOTS: usize = 8;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("could not read config file \"{}\": {source}", path.display())]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML or has wrong types
    #[error("invalid slot configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings of the slot subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlotConfig {
    /// Data directory; slots live in `<data_dir>/pg_replslot`
    pub data_dir: PathBuf,
    /// Slot table capacity; 0 disables slots
    pub max_replication_slots: usize,
    /// Configured WAL level; slots need `archive` or above
    pub wal_level: WalLevel,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            max_replication_slots: DEFAULT_MAX_REPLICATION_SLOTS,
            wal_level: WalLevel::default(),
        }
    }
}

impl SlotConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
