//! Deletion primitives (trash or permanent).
//!
//! # Safety
//!
//! Every deletion first re-reads the file's metadata. With verification
//! enabled, a file whose size or mtime no longer matches its index record is
//! refused with [`DeleteError::Modified`]: it is no longer the copy that was
//! fingerprinted.
//!
//! # Example
//!
//! ```no_run
//! use dupler::actions::delete::{delete_verified, Expected};
//! use dupler::config::DeleteMode;
//! use std::path::Path;
//!
//! let expected = Expected { size: 1024, mtime_ns: 1_700_000_000_000_000_000 };
//! match delete_verified(Path::new("/data/copy.txt"), Some(expected), DeleteMode::Trash) {
//!     Ok(bytes) => println!("Freed {} bytes", bytes),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{DeleteMode, Settings};
use crate::index::entry::system_time_to_nanos;
use crate::index::FileRecord;

/// Per-file deletion failure.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// The file is already gone.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The filesystem refused the deletion.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Size or mtime changed since the file was indexed.
    #[error("file modified since scan: {0}")]
    Modified(PathBuf),

    /// Moving to the trash failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed {
        /// File that could not be trashed
        path: PathBuf,
        /// Message from the trash backend
        message: String,
    },

    /// Removing the file failed.
    #[error("permanent delete failed for {path}: {message}")]
    PermanentDeleteFailed {
        /// File that could not be removed
        path: PathBuf,
        /// Message from the OS
        message: String,
    },

    /// The selection would leave no copy of a group.
    #[error("cannot delete all copies - at least one file must be preserved")]
    AllCopiesWouldBeDeleted,

    /// Other I/O failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// File being inspected
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl DeleteError {
    /// The path this error concerns, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::Modified(p)
            | Self::TrashFailed { path: p, .. }
            | Self::PermanentDeleteFailed { path: p, .. }
            | Self::Io { path: p, .. } => Some(p),
            Self::AllCopiesWouldBeDeleted => None,
        }
    }

    fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}

/// Size and mtime a file must still have to be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    /// Size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_ns: i64,
}

impl Expected {
    /// Expectations taken from an index record.
    #[must_use]
    pub fn of(record: &FileRecord) -> Self {
        Self {
            size: record.size,
            mtime_ns: record.mtime_ns,
        }
    }
}

fn current_size(path: &Path, expected: Option<Expected>) -> Result<u64, DeleteError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| DeleteError::from_io(path, e))?;

    if let Some(expected) = expected {
        let mtime_ns = metadata.modified().map(system_time_to_nanos).ok();
        if metadata.len() != expected.size || mtime_ns.is_some_and(|m| m != expected.mtime_ns) {
            log::warn!(
                "File modified since scan: {} (size {} -> {})",
                path.display(),
                expected.size,
                metadata.len()
            );
            return Err(DeleteError::Modified(path.to_path_buf()));
        }
    }

    Ok(metadata.len())
}

/// Move a file to the system trash. Returns the bytes freed.
///
/// # Errors
///
/// `NotFound`, `PermissionDenied` or `TrashFailed`.
pub fn delete_to_trash(path: &Path) -> Result<u64, DeleteError> {
    let size = current_size(path, None)?;
    trash_file(path, size)
}

fn trash_file(path: &Path, size: u64) -> Result<u64, DeleteError> {
    trash::delete(path).map_err(|e| {
        log::error!("Trash operation failed for {}: {}", path.display(), e);
        DeleteError::TrashFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    log::info!("Moved to trash: {} ({} bytes)", path.display(), size);
    Ok(size)
}

/// Remove a file permanently. Returns the bytes freed.
///
/// # Errors
///
/// `NotFound`, `PermissionDenied` or `PermanentDeleteFailed`.
pub fn permanent_delete(path: &Path) -> Result<u64, DeleteError> {
    let size = current_size(path, None)?;
    remove_file(path, size)
}

fn remove_file(path: &Path, size: u64) -> Result<u64, DeleteError> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => DeleteError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => DeleteError::PermissionDenied(path.to_path_buf()),
        _ => {
            log::error!("Permanent delete failed for {}: {}", path.display(), e);
            DeleteError::PermanentDeleteFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        }
    })?;
    log::info!("Permanently deleted: {} ({} bytes)", path.display(), size);
    Ok(size)
}

/// Delete `path` in `mode`, optionally checking it still matches `expected`.
///
/// # Errors
///
/// `Modified` when the check fails, otherwise the errors of
/// [`delete_to_trash`] or [`permanent_delete`].
pub fn delete_verified(
    path: &Path,
    expected: Option<Expected>,
    mode: DeleteMode,
) -> Result<u64, DeleteError> {
    let size = current_size(path, expected)?;
    match mode {
        DeleteMode::Permanent => remove_file(path, size),
        DeleteMode::Trash => trash_file(path, size),
    }
}

/// Check that deleting `selected` leaves at least one member of `group`.
///
/// # Errors
///
/// [`DeleteError::AllCopiesWouldBeDeleted`] otherwise.
pub fn validate_preserves_copy(
    selected: &[PathBuf],
    group: &[PathBuf],
) -> Result<(), DeleteError> {
    let selected: HashSet<&PathBuf> = selected.iter().collect();
    let preserved = group.iter().filter(|p| !selected.contains(p)).count();

    if preserved == 0 {
        log::error!(
            "Refusing to delete all {} copies of a duplicate group",
            group.len()
        );
        return Err(DeleteError::AllCopiesWouldBeDeleted);
    }
    Ok(())
}

/// Removes the file behind an index record.
///
/// The dedup workflow deletes through this seam. Returning
/// `Err(DeleteError::NotFound)` means the file was already gone.
pub trait FileRemover {
    /// Delete the file for `record`, returning the bytes freed.
    ///
    /// # Errors
    ///
    /// Any [`DeleteError`]; the record is kept unless the error is `NotFound`.
    fn remove(&self, record: &FileRecord) -> Result<u64, DeleteError>;
}

/// [`FileRemover`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsRemover {
    /// Trash or permanent deletion
    pub mode: DeleteMode,
    /// Refuse files whose size or mtime changed since indexing
    pub verify: bool,
}

impl FsRemover {
    /// Remover configured from settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mode: settings.delete_mode,
            verify: settings.verify_before_delete,
        }
    }
}

impl Default for FsRemover {
    fn default() -> Self {
        Self {
            mode: DeleteMode::Permanent,
            verify: true,
        }
    }
}

impl FileRemover for FsRemover {
    fn remove(&self, record: &FileRecord) -> Result<u64, DeleteError> {
        let expected = self.verify.then(|| Expected::of(record));
        delete_verified(&record.path, expected, self.mode)
    }
}
