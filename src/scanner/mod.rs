//! Scanner module for directory traversal and file fingerprinting.
//!
//! This module provides functionality for:
//! - Lazy directory walking with real-path tracking (no path visited twice)
//! - Content fingerprinting with BLAKE3 (prehash + full digest)
//! - Unicode path normalization for index keys
//! - The incremental scan pipeline that feeds the index
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal, exclude rules, file discovery
//! - [`hasher`]: BLAKE3 prehash and full fingerprints (streaming)
//! - [`path_utils`]: NFC normalization of absolute paths
//! - [`pipeline`]: Walk → compare → hash → upsert → sweep
//!
//! # Example
//!
//! ```no_run
//! use dupler::scanner::{Walker, WalkerConfig};
//! use std::path::PathBuf;
//!
//! let walker = Walker::new(vec![PathBuf::from(".")], WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod path_utils;
pub mod pipeline;
pub mod walker;

use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::Settings;

// Re-export main types
pub use hasher::{Fingerprint, Hasher, FINGERPRINT_LEN, PREHASH_SIZE};
pub use pipeline::{ScanSummary, Scanner};
pub use walker::{ExcludeRules, Walker};

/// Metadata for a discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Normalized absolute (real) path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            size,
            modified,
        }
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    /// Cycles are pruned through real-path tracking.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Gitignore-style patterns for files to exclude.
    pub exclude_files: Vec<String>,

    /// Gitignore-style patterns for directories to exclude.
    pub exclude_directories: Vec<String>,
}

impl WalkerConfig {
    /// Build the walk configuration from workspace settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            follow_symlinks: settings.follow_symlinks,
            skip_hidden: settings.skip_hidden,
            exclude_files: settings.exclude_files.clone(),
            exclude_directories: settings.exclude_directories.clone(),
        }
    }
}

/// Errors that can occur during directory scanning.
///
/// These are per-entry and never abort a scan.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The entry vanished between listing and inspection.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be fingerprinted.
    #[error(transparent)]
    Read(#[from] HashError),
}

impl ScanError {
    /// Classify an I/O error for `path`.
    pub fn from_io(path: PathBuf, error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            ErrorKind::NotFound => Self::NotFound(path),
            _ => Self::Io {
                path,
                source: error,
            },
        }
    }
}

/// Errors that can occur during file hashing (the engine's `ReadError`).
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Hashing was abandoned because shutdown was requested.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Path of the file that failed.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound(p) | Self::PermissionDenied(p) | Self::Interrupted(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}
