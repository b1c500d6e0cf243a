//! Filesystem primitives for slot persistence
//!
//! Thin wrappers over `std::fs` that make the durability steps explicit:
//! write-and-fsync, fsync of a directory entry, idempotent removal, and the
//! crash section that follows every durable rename.

use replslot_core::{Result, SlotError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Create or truncate `path`, write `bytes`, fsync and close.
pub fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Open `path`, fsync it, and read up to `len` bytes.
///
/// The returned buffer is shorter than `len` when the file is.
pub fn read_synced(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    file.sync_all()?;

    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Fsync a file or directory by path.
pub fn fsync_path(path: &Path) -> io::Result<()> {
    // Directories open read-only on unix; sync_all then flushes the entry.
    File::open(path)?.sync_all()
}

/// Remove a file, treating absence as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating absence as success.
///
/// Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Fsync every path in order; any failure is critical.
///
/// Runs after a rename has already made new state visible. If one of these
/// fsyncs fails the on-disk state is unknown, so the error is mapped to
/// [`SlotError::Critical`] instead of an ordinary I/O error.
pub fn crash_section(context: &str, paths: &[&Path]) -> Result<()> {
    for path in paths {
        if let Err(e) = fsync_path(path) {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "{}: fsync failed inside crash section",
                context
            );
            return Err(SlotError::critical(
                format!("{}: could not fsync \"{}\"", context, path.display()),
                e,
            ));
        }
    }
    Ok(())
}
