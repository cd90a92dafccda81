//! Single-writer lock for the index.
//!
//! A write session (scan, dedup, gc) holds `.dupler/index.lock` for its whole
//! duration. The file is created atomically with `create_new`, so a second
//! writer fails fast with [`DuplerError::LockHeld`] instead of blocking.
//! Readers call [`ensure_unlocked`] to refuse to observe an index that is
//! mid-update.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{DuplerError, Result};

/// RAII guard for the write lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    /// Acquire the lock at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::LockHeld`] if another session holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let holder = format!("pid {}", std::process::id());
                file.write_all(holder.as_bytes())
                    .map_err(|e| DuplerError::io(path, e))?;
                log::debug!("Acquired index lock {} ({})", path.display(), holder);
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(held(path)),
            Err(e) => Err(DuplerError::io(path, e)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released index lock {}", self.path.display()),
            Err(e) => log::warn!(
                "Failed to remove index lock {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Fail if a write session currently holds the lock at `path`.
///
/// # Errors
///
/// Returns [`DuplerError::LockHeld`] when the lock file exists.
pub fn ensure_unlocked(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(held(path));
    }
    Ok(())
}

/// Remove a lock file left behind by a crashed session.
///
/// Returns true if a lock was removed.
///
/// # Errors
///
/// Fails if the file exists but cannot be removed.
pub fn force_release(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::warn!("Removed stale index lock {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DuplerError::io(path, e)),
    }
}

fn held(path: &Path) -> DuplerError {
    let holder = std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown holder".to_string());
    DuplerError::LockHeld {
        path: path.to_path_buf(),
        holder,
    }
}
