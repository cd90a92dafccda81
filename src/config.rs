//! Workspace layout and settings.
//!
//! An initialized root holds a `.dupler/` data directory next to the files
//! it indexes:
//!
//! ```text
//! <root>/.dupler/index.sqlite3   the index artifact
//! <root>/.dupler/settings.toml   persisted settings
//! <root>/.dupler/index.lock      present while a write session runs
//! ```
//!
//! Settings are layered with figment: built-in defaults, then
//! `settings.toml`, then `DUPLER_*` environment variables.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{DuplerError, Result};
use crate::scanner::path_utils;

/// Name of the per-root data directory.
pub const DATA_DIR_NAME: &str = ".dupler";
/// Index database file inside the data directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite3";
/// Settings file inside the data directory.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
/// Write-session lock file inside the data directory.
pub const LOCK_FILE_NAME: &str = "index.lock";
/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DUPLER_";

/// What a `find` pattern is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTarget {
    /// Final path component only.
    #[default]
    Basename,
    /// The full normalized absolute path.
    Path,
}

/// How redundant copies are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove the file from the filesystem.
    #[default]
    Permanent,
    /// Move the file to the system trash.
    Trash,
}

/// Settings for one initialized root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gitignore-style patterns for files to skip.
    pub exclude_files: Vec<String>,
    /// Gitignore-style patterns for directories to skip.
    pub exclude_directories: Vec<String>,
    /// Skip dot-files and dot-directories.
    pub skip_hidden: bool,
    /// Follow symbolic links while walking.
    pub follow_symlinks: bool,
    /// Hashing pool size.
    pub workers: usize,
    /// Bytes read for the prehash.
    pub prehash_size: usize,
    /// Upserts per committed transaction.
    pub commit_batch: usize,
    /// Target of `find` patterns.
    pub match_target: MatchTarget,
    /// Whether `find` patterns are case sensitive.
    pub case_sensitive: bool,
    /// Deletion mode used by `dedup`.
    pub delete_mode: DeleteMode,
    /// Refuse to delete a file whose size or mtime changed since it was indexed.
    pub verify_before_delete: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exclude_files: Vec::new(),
            exclude_directories: Vec::new(),
            skip_hidden: true,
            follow_symlinks: false,
            workers: 4,
            prehash_size: crate::scanner::PREHASH_SIZE,
            commit_batch: 512,
            match_target: MatchTarget::Basename,
            case_sensitive: false,
            delete_mode: DeleteMode::Permanent,
            verify_before_delete: true,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the file at `path`, then `DUPLER_*` env.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::Config`] if the file or an env value is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Load settings from `path` only, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::Config`] if the file is invalid.
    pub fn load_file(path: &Path) -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()?;
        Ok(settings)
    }

    /// Write settings as TOML.
    ///
    /// # Errors
    ///
    /// Fails if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| DuplerError::io(path, e))?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Number of hashing workers, at least one.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Upserts per transaction, at least one.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.commit_batch.max(1)
    }

    fn excludes_mut(&mut self, directory: bool) -> &mut Vec<String> {
        if directory {
            &mut self.exclude_directories
        } else {
            &mut self.exclude_files
        }
    }

    /// Add an exclude pattern. Returns false if it was already present.
    pub fn add_exclude(&mut self, pattern: &str, directory: bool) -> bool {
        let list = self.excludes_mut(directory);
        if list.iter().any(|p| p == pattern) {
            return false;
        }
        list.push(pattern.to_string());
        true
    }

    /// Remove an exclude pattern. Returns false if it was not present.
    pub fn remove_exclude(&mut self, pattern: &str, directory: bool) -> bool {
        let list = self.excludes_mut(directory);
        let before = list.len();
        list.retain(|p| p != pattern);
        list.len() != before
    }
}

/// An initialized (or to-be-initialized) root and its data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Directory containing `.dupler/`.
    pub base_dir: PathBuf,
    /// The `.dupler/` directory itself.
    pub data_dir: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `base_dir`, which need not be initialized yet.
    ///
    /// # Errors
    ///
    /// Fails if `base_dir` cannot be canonicalized.
    pub fn at(base_dir: &Path) -> Result<Self> {
        let base_dir =
            path_utils::normalize_absolute(base_dir).map_err(|e| DuplerError::io(base_dir, e))?;
        let data_dir = base_dir.join(DATA_DIR_NAME);
        Ok(Self { base_dir, data_dir })
    }

    /// Find the nearest initialized workspace at or above `start`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::NotInitialized`] when no ancestor holds a
    /// `.dupler` directory.
    pub fn discover(start: &Path) -> Result<Self> {
        let start =
            path_utils::normalize_absolute(start).map_err(|e| DuplerError::io(start, e))?;
        for dir in start.ancestors() {
            let data_dir = dir.join(DATA_DIR_NAME);
            if data_dir.is_dir() {
                log::debug!("Using workspace at {}", dir.display());
                return Ok(Self {
                    base_dir: dir.to_path_buf(),
                    data_dir,
                });
            }
        }
        Err(DuplerError::NotInitialized(start))
    }

    /// Whether the data directory exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.data_dir.is_dir()
    }

    /// Path of the index database.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE_NAME)
    }

    /// Path of the settings file.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }

    /// Path of the write-session lock.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE_NAME)
    }

    /// Load this workspace's settings (with env overrides).
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::Config`] for invalid settings.
    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path())
    }
}
