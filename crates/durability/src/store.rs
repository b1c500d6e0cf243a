//! Slot directory store
//!
//! Every slot owns a directory below the base directory:
//!
//! ```text
//! <data_dir>/pg_replslot/
//!     <name>/state          current record
//!     <name>/state.tmp      record being written
//!     <name>/state.backup   previous good copy, written before state.tmp
//!     <name>.tmp/           slot being created or dropped
//! ```
//!
//! A slot directory only appears under its final name once it holds a
//! complete, fsynced record. A save writes the backup first and the
//! temporary record second, then renames the temporary record over `state`.
//! At startup a damaged `state` is read again from `state.backup` and
//! rewritten in place.

use crate::format::{decode_slot_record, encode_slot_record, SLOT_RECORD_SIZE};
use crate::fs::{
    crash_section, fsync_path, read_synced, remove_dir_if_exists, remove_file_if_exists,
    write_synced,
};
use parking_lot::MutexGuard;
use replslot_core::{ErrorLevel, Result, SlotData, SlotError, SlotName, SlotPersistency};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory below the data directory that holds all slots
pub const SLOT_BASE_DIR: &str = "pg_replslot";

/// Current record
pub const STATE_FILE: &str = "state";
/// Record being written
pub const STATE_TMP_FILE: &str = "state.tmp";
/// Previous good record
pub const STATE_BACKUP_FILE: &str = "state.backup";
/// Suffix of in-flight create/drop directories
pub const TMP_DIR_SUFFIX: &str = ".tmp";

/// A slot as seen by the store
///
/// The store never touches slot memory directly. It reads and clears the
/// dirty flags through this trait and serializes its disk work on the slot's
/// I/O lock.
pub trait PersistentSlot {
    /// Name of the slot
    fn slot_name(&self) -> SlotName;

    /// Read the dirty flag and clear `just_dirtied`, atomically.
    fn begin_save(&self) -> bool;

    /// Set the dirty flag so the next save writes unconditionally.
    fn force_dirty(&self);

    /// Copy of the persistent fields
    fn snapshot(&self) -> SlotData;

    /// Clear the dirty flag unless the slot was dirtied since
    /// [`begin_save`](PersistentSlot::begin_save).
    fn finish_save(&self);

    /// Lock serializing disk access to this slot
    fn io_lock(&self) -> MutexGuard<'_, ()>;
}

/// Result of loading one slot directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A persistent slot to install in the table
    Restored {
        /// Decoded record
        data: SlotData,
        /// `state` was rebuilt from `state.backup`
        repaired: bool,
    },
    /// A non-persistent slot left over from a crash; its directory is gone
    Discarded(SlotData),
}

/// Entry of the base directory found during a startup scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDirEntry {
    /// Directory of a slot
    Slot(PathBuf),
    /// Remains of an interrupted create or drop
    Leftover(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadSource {
    Primary,
    Backup,
}

/// On-disk home of all slots
#[derive(Debug, Clone)]
pub struct SlotStore {
    base_dir: PathBuf,
}

impl SlotStore {
    /// Store rooted at `<data_dir>/pg_replslot`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: data_dir.as_ref().join(SLOT_BASE_DIR),
        }
    }

    /// The `pg_replslot` directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Final directory of a slot
    pub fn slot_dir(&self, name: &SlotName) -> PathBuf {
        self.base_dir.join(name.as_str())
    }

    /// In-flight directory of a slot
    pub fn tmp_dir(&self, name: &SlotName) -> PathBuf {
        self.base_dir
            .join(format!("{}{}", name.as_str(), TMP_DIR_SUFFIX))
    }

    /// Whether the slot's final directory exists
    pub fn slot_dir_exists(&self, name: &SlotName) -> bool {
        self.slot_dir(name).is_dir()
    }

    /// Create the base directory if it is missing.
    pub fn ensure_base_dir(&self) -> Result<()> {
        if self.base_dir.is_dir() {
            return Ok(());
        }

        fs::create_dir_all(&self.base_dir).map_err(|e| {
            SlotError::io(
                format!("could not create directory \"{}\"", self.base_dir.display()),
                e,
            )
        })?;
        fsync_path(&self.base_dir).map_err(|e| fsync_error(&self.base_dir, e))?;
        if let Some(parent) = self.base_dir.parent() {
            fsync_path(parent).map_err(|e| fsync_error(parent, e))?;
        }

        info!(path = %self.base_dir.display(), "created replication slot directory");
        Ok(())
    }

    /// Put a new slot on disk.
    ///
    /// The record is written and fsynced inside `<name>.tmp`, which is then
    /// renamed to `<name>`. The rename and the following fsyncs are the only
    /// window in which a crash leaves the directory in an unknown state, so
    /// an fsync failure there is critical.
    pub fn create_slot<S: PersistentSlot + ?Sized>(&self, slot: &S) -> Result<()> {
        let name = slot.slot_name();
        let tmp = self.tmp_dir(&name);
        let dir = self.slot_dir(&name);

        // A stale directory left by an earlier create or drop; if it can't be
        // removed, create_dir below reports the problem.
        if let Err(e) = remove_dir_if_exists(&tmp) {
            warn!(path = %tmp.display(), error = %e, "could not remove leftover directory");
        }

        fs::create_dir(&tmp).map_err(|e| {
            SlotError::io(format!("could not create directory \"{}\"", tmp.display()), e)
        })?;
        fsync_path(&tmp).map_err(|e| fsync_error(&tmp, e))?;

        slot.force_dirty();
        self.save_slot(slot, &tmp, ErrorLevel::Error)?;

        fs::rename(&tmp, &dir).map_err(|e| {
            SlotError::io(
                format!(
                    "could not rename directory \"{}\" to \"{}\"",
                    tmp.display(),
                    dir.display()
                ),
                e,
            )
        })?;
        crash_section("create replication slot", &[&dir, &self.base_dir])?;

        info!(slot = %name, path = %dir.display(), "created replication slot on disk");
        Ok(())
    }

    /// Write the slot's record into `dir` if it is dirty.
    ///
    /// Returns whether a record was written. I/O failures before the rename
    /// are reported at `level`; failures after it are critical regardless.
    pub fn save_slot<S: PersistentSlot + ?Sized>(
        &self,
        slot: &S,
        dir: &Path,
        level: ErrorLevel,
    ) -> Result<bool> {
        if !slot.begin_save() {
            return Ok(false);
        }

        let _io = slot.io_lock();

        let state = dir.join(STATE_FILE);
        let tmp = dir.join(STATE_TMP_FILE);
        let backup = dir.join(STATE_BACKUP_FILE);

        for path in [&backup, &tmp] {
            let record = encode_slot_record(&slot.snapshot());
            if let Err(e) = write_synced(path, &record) {
                level.report(SlotError::io(
                    format!("could not write to file \"{}\"", path.display()),
                    e,
                ))?;
                return Ok(false);
            }
        }

        if let Err(e) = fs::rename(&tmp, &state) {
            level.report(SlotError::io(
                format!(
                    "could not rename file \"{}\" to \"{}\"",
                    tmp.display(),
                    state.display()
                ),
                e,
            ))?;
            return Ok(false);
        }
        crash_section("save replication slot", &[&state, dir, &self.base_dir])?;

        slot.finish_save();
        debug!(slot = %slot.slot_name(), path = %state.display(), "saved replication slot");
        Ok(true)
    }

    /// Load the slot stored under `name`.
    pub fn load_slot(&self, name: &SlotName) -> Result<LoadOutcome> {
        self.load_slot_dir(&self.slot_dir(name))
    }

    /// Load the slot stored in `dir`.
    ///
    /// Startup only: nothing else may touch the directory meanwhile. A record
    /// that fails validation is read again from `state.backup`, once; a
    /// second failure, a short read, or a missing file is fatal.
    pub fn load_slot_dir(&self, dir: &Path) -> Result<LoadOutcome> {
        let state = dir.join(STATE_FILE);
        let tmp = dir.join(STATE_TMP_FILE);
        let backup = dir.join(STATE_BACKUP_FILE);

        // state.tmp still present means a save died before its rename; the
        // backup written just before it can't be trusted either.
        let mut backup_usable = true;
        if remove_file_if_exists(&tmp).map_err(|e| remove_error(&tmp, e))? {
            remove_file_if_exists(&backup).map_err(|e| remove_error(&backup, e))?;
            backup_usable = false;
        }

        let mut source = LoadSource::Primary;
        loop {
            let path = match source {
                LoadSource::Primary => &state,
                LoadSource::Backup => &backup,
            };
            debug!(path = %path.display(), "restoring replication slot");

            let bytes = read_synced(path, SLOT_RECORD_SIZE).map_err(|e| {
                SlotError::io(format!("could not read file \"{}\"", path.display()), e)
            })?;
            crash_section("restore replication slot", &[dir])?;

            if bytes.len() != SLOT_RECORD_SIZE {
                return Err(SlotError::io(
                    format!(
                        "could not read file \"{}\", read {} of {}",
                        path.display(),
                        bytes.len(),
                        SLOT_RECORD_SIZE
                    ),
                    io::Error::from(io::ErrorKind::UnexpectedEof),
                ));
            }

            match decode_slot_record(&bytes) {
                Ok(data) => return self.finish_load(dir, &state, data, &bytes, source),
                Err(e) if source == LoadSource::Primary && backup_usable => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "replication slot file is damaged, trying backup file"
                    );
                    source = LoadSource::Backup;
                }
                Err(e) => return Err(SlotError::corrupt(path.clone(), e.to_string())),
            }
        }
    }

    fn finish_load(
        &self,
        dir: &Path,
        state: &Path,
        data: SlotData,
        bytes: &[u8],
        source: LoadSource,
    ) -> Result<LoadOutcome> {
        if data.persistency != SlotPersistency::Persistent {
            if let Err(e) = remove_dir_if_exists(dir) {
                warn!(path = %dir.display(), error = %e, "could not remove directory");
            }
            fsync_path(&self.base_dir).map_err(|e| fsync_error(&self.base_dir, e))?;
            info!(
                slot = %data.name,
                persistency = ?data.persistency,
                "discarded non-persistent replication slot"
            );
            return Ok(LoadOutcome::Discarded(data));
        }

        let repaired = source == LoadSource::Backup;
        if repaired {
            warn!(slot = %data.name, path = %state.display(), "recovering replication slot file from backup");
            write_synced(state, bytes).map_err(|e| {
                SlotError::io(
                    format!("could not rewrite slot file \"{}\"", state.display()),
                    e,
                )
            })?;
        }

        Ok(LoadOutcome::Restored { data, repaired })
    }

    /// First half of a drop: move `<name>` to `<name>.tmp`.
    ///
    /// A failed rename is an ordinary [`SlotError::Io`]; a failed fsync
    /// afterwards is critical.
    pub fn retire_slot_dir(&self, name: &SlotName) -> Result<()> {
        let dir = self.slot_dir(name);
        let tmp = self.tmp_dir(name);

        fs::rename(&dir, &tmp).map_err(|e| {
            SlotError::io(
                format!(
                    "could not rename directory \"{}\" to \"{}\"",
                    dir.display(),
                    tmp.display()
                ),
                e,
            )
        })?;
        crash_section("drop replication slot", &[&tmp, &self.base_dir])
    }

    /// Second half of a drop: delete `<name>.tmp`.
    pub fn remove_retired_dir(&self, name: &SlotName) -> Result<()> {
        let tmp = self.tmp_dir(name);
        remove_dir_if_exists(&tmp)
            .map(|_| ())
            .map_err(|e| remove_error(&tmp, e))
    }

    /// Delete a leftover `*.tmp` directory found at startup.
    pub fn remove_leftover(&self, path: &Path) -> Result<()> {
        remove_dir_if_exists(path).map_err(|e| remove_error(path, e))?;
        fsync_path(&self.base_dir).map_err(|e| fsync_error(&self.base_dir, e))
    }

    /// Directories of the base directory, in name order.
    ///
    /// Plain files and hidden entries are skipped.
    pub fn scan(&self) -> Result<Vec<SlotDirEntry>> {
        let read_dir = fs::read_dir(&self.base_dir).map_err(|e| {
            SlotError::io(
                format!("could not open directory \"{}\"", self.base_dir.display()),
                e,
            )
        })?;

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                SlotError::io(
                    format!("could not read directory \"{}\"", self.base_dir.display()),
                    e,
                )
            })?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                debug!(entry = %file_name, "skipping non-directory in slot directory");
                continue;
            }
            names.push(file_name);
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|file_name| {
                let path = self.base_dir.join(&file_name);
                if file_name.ends_with(TMP_DIR_SUFFIX) {
                    SlotDirEntry::Leftover(path)
                } else {
                    SlotDirEntry::Slot(path)
                }
            })
            .collect())
    }
}

fn fsync_error(path: &Path, e: io::Error) -> SlotError {
    SlotError::io(format!("could not fsync \"{}\"", path.display()), e)
}

fn remove_error(path: &Path, e: io::Error) -> SlotError {
    SlotError::io(format!("could not remove \"{}\"", path.display()), e)
}
