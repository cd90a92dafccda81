//! Structured error handling and exit codes.
//!
//! Index-level failures are fatal and abort a command before any state is
//! mutated. Per-file problems (read errors during a scan, delete errors during
//! a dedup session) never surface here: they are collected in the command
//! summaries instead.

use std::path::PathBuf;

use serde::Serialize;

/// Fatal errors raised by the engine.
#[derive(thiserror::Error, Debug)]
pub enum DuplerError {
    /// No `.dupler` directory was found from the starting directory upward.
    #[error("not initialized: no index found at or above {0} (run `dupler init`)")]
    NotInitialized(PathBuf),

    /// `init` was asked to create an index where one already exists.
    #[error("already initialized: {0} (use --force to recreate the index)")]
    AlreadyInitialized(PathBuf),

    /// Another write session holds the index lock.
    #[error("index is locked by another session ({holder}); remove {path} if no dupler process is running")]
    LockHeld {
        /// Lock file path
        path: PathBuf,
        /// Contents of the lock file (owner description)
        holder: String,
    },

    /// A `find` pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as given by the user
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// The index artifact is unreadable or has an unexpected schema.
    #[error("corrupt index at {path}: {reason} (run `dupler init --force`)")]
    CorruptIndex {
        /// Index database path
        path: PathBuf,
        /// Underlying problem
        reason: String,
    },

    /// A scan root does not exist or is not a directory.
    #[error("invalid scan root: {0}")]
    InvalidRoot(PathBuf),

    /// The command was interrupted by the user before it could complete.
    #[error("interrupted by user")]
    Interrupted,

    /// SQLite failure while the index was open.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The hashing pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Settings could not be serialized.
    #[error("failed to write settings: {0}")]
    SettingsWrite(#[from] toml::ser::Error),

    /// I/O failure on an index-owned path (data directory, lock, settings).
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl DuplerError {
    /// Build an [`DuplerError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error concerns the index itself (missing, locked, corrupt).
    #[must_use]
    pub fn is_fatal_index_error(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized(_)
                | Self::AlreadyInitialized(_)
                | Self::LockHeld { .. }
                | Self::CorruptIndex { .. }
        )
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, DuplerError>;

/// Exit codes for the dupler binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Index error (not initialized, already initialized, locked, corrupt)
/// - 3: Partial success (completed with per-file errors)
/// - 4: Invalid pattern
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Command completed without per-file errors.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The index could not be used.
    IndexError = 2,
    /// Command completed but some files could not be read or deleted.
    PartialSuccess = 3,
    /// The `find` pattern was rejected.
    InvalidPattern = 4,
    /// Interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DP000",
            Self::GeneralError => "DP001",
            Self::IndexError => "DP002",
            Self::PartialSuccess => "DP003",
            Self::InvalidPattern => "DP004",
            Self::Interrupted => "DP130",
        }
    }

    /// Pick the exit code for a failed command.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<DuplerError>() {
            Some(DuplerError::Interrupted) => Self::Interrupted,
            Some(DuplerError::InvalidPattern { .. }) => Self::InvalidPattern,
            Some(e) if e.is_fatal_index_error() => Self::IndexError,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DP002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
