//! Index record definitions.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::scanner::{FileEntry, Fingerprint};

/// One indexed file.
///
/// The key is the normalized absolute path. `prehash` and `fingerprint`
/// stay empty until a size (or prehash) collision demands them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Normalized absolute path (primary key)
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_ns: i64,
    /// Size-keyed digest of the first bytes of the file
    pub prehash: Option<Fingerprint>,
    /// Full-content digest
    pub fingerprint: Option<Fingerprint>,
    /// Generation of the scan that last saw this file
    pub generation: u64,
}

impl FileRecord {
    /// Fresh record for a walked entry, with no digests yet.
    #[must_use]
    pub fn from_entry(entry: &FileEntry, generation: u64) -> Self {
        Self {
            path: entry.path.clone(),
            size: entry.size,
            mtime_ns: system_time_to_nanos(entry.modified),
            prehash: None,
            fingerprint: None,
            generation,
        }
    }

    /// Whether the size and mtime still match a freshly walked entry.
    #[must_use]
    pub fn is_unchanged(&self, entry: &FileEntry) -> bool {
        self.size == entry.size && self.mtime_ns == system_time_to_nanos(entry.modified)
    }

    /// Modification time as a [`SystemTime`].
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        nanos_to_system_time(self.mtime_ns)
    }

    /// The final path component, if it is valid UTF-8.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// The directory containing this file.
    #[must_use]
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// Convert a [`SystemTime`] to signed nanoseconds since the Unix epoch.
///
/// Times outside the `i64` range saturate.
#[must_use]
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Inverse of [`system_time_to_nanos`].
#[must_use]
pub fn nanos_to_system_time(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}
