//! Engine-facing commands.
//!
//! Each command opens what it needs, in this order: workspace, write lock
//! (for mutating commands), index. Every fatal condition is therefore
//! detected before the first write. Results are serde-serializable summaries;
//! formatting them is left to the caller.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;

use crate::actions::{FileRemover, FsRemover};
use crate::config::{Settings, Workspace, DATA_DIR_NAME};
use crate::dedup::{DecisionProvider, DedupSummary, ResolutionSession};
use crate::duplicates::GroupingStats;
use crate::error::{DuplerError, Result};
use crate::index::lock::{ensure_unlocked, force_release};
use crate::index::{IndexCounts, IndexStore, WriteLock};
use crate::progress::ProgressCallback;
use crate::query::QueryEngine;
use crate::scanner::{ExcludeRules, ScanSummary, Scanner};

/// Result of `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitSummary {
    /// Initialized root
    pub base_dir: PathBuf,
    /// Created index file
    pub index_path: PathBuf,
    /// True if an existing index was replaced (`--force`)
    pub replaced: bool,
}

/// Result of `gc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcSummary {
    /// Records checked against the filesystem
    pub checked: u64,
    /// Records purged because their file is gone
    pub purged: u64,
}

/// Result of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    /// Initialized root
    pub base_dir: PathBuf,
    /// Last completed scan generation (0 before the first scan)
    pub generation: u64,
    /// Default scan roots
    pub roots: Vec<PathBuf>,
    /// Record counts
    pub counts: IndexCounts,
    /// Duplicate figures
    pub duplicates: GroupingStats,
}

/// Current exclude patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludeList {
    /// File name patterns
    pub files: Vec<String>,
    /// Directory name patterns
    pub directories: Vec<String>,
}

/// Whether a name would be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCheck {
    /// Tested name
    pub name: String,
    /// False if the walk would skip it
    pub valid: bool,
}

/// An initialized workspace with its settings, ready to run commands.
pub struct Dupler {
    workspace: Workspace,
    settings: Settings,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for Dupler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dupler")
            .field("workspace", &self.workspace)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dupler {
    /// Initialize `dir`: data directory, default settings, empty index.
    ///
    /// With `force`, an existing index is discarded; the settings file is
    /// kept. The write lock is taken before anything is removed, so a
    /// running session is never disturbed.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` if an index exists and `force` is false,
    /// `LockHeld` if a write session (or a stale lock, see [`Dupler::unlock`])
    /// holds the index.
    pub fn init(dir: &Path, force: bool) -> Result<InitSummary> {
        let workspace = Workspace::at(dir)?;
        let index_path = workspace.index_path();
        let exists = index_path.exists();

        if exists && !force {
            return Err(DuplerError::AlreadyInitialized(workspace.base_dir));
        }

        fs::create_dir_all(&workspace.data_dir)
            .map_err(|e| DuplerError::io(&workspace.data_dir, e))?;
        let _lock = WriteLock::acquire(&workspace.lock_path())?;
        if force {
            IndexStore::destroy(&index_path)?;
        }

        let store = IndexStore::create(&index_path)?;
        store.set_roots(std::slice::from_ref(&workspace.base_dir))?;

        let settings_path = workspace.settings_path();
        if !settings_path.exists() {
            Settings::default().save(&settings_path)?;
        }

        log::info!("Initialized {}", workspace.base_dir.display());
        Ok(InitSummary {
            base_dir: workspace.base_dir,
            index_path,
            replaced: exists,
        })
    }

    /// Remove the lock file left behind by a session that crashed.
    ///
    /// Returns true if a lock was removed. Only run this when no other
    /// dupler process is using the index.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, or an I/O error removing the file.
    pub fn unlock(start: &Path) -> Result<bool> {
        let workspace = Workspace::discover(start)?;
        force_release(&workspace.lock_path())
    }

    /// Discover the workspace at or above `start` and load its settings.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, or `Config` for invalid settings.
    pub fn open(start: &Path) -> Result<Self> {
        Self::from_workspace(Workspace::discover(start)?)
    }

    /// Use `workspace` and load its settings.
    ///
    /// # Errors
    ///
    /// `NotInitialized` if the data directory is missing, `Config` for
    /// invalid settings.
    pub fn from_workspace(workspace: Workspace) -> Result<Self> {
        if !workspace.is_initialized() {
            return Err(DuplerError::NotInitialized(workspace.base_dir));
        }
        let settings = workspace.load_settings()?;
        Ok(Self::with_settings(workspace, settings))
    }

    /// Use `workspace` with explicit settings.
    #[must_use]
    pub fn with_settings(workspace: Workspace, settings: Settings) -> Self {
        Self {
            workspace,
            settings,
            shutdown_flag: None,
            progress: None,
        }
    }

    /// Cooperative cancellation for scan and dedup.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Progress reporting for scans.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The workspace.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn write_session(&self) -> Result<(WriteLock, IndexStore)> {
        let lock = WriteLock::acquire(&self.workspace.lock_path())?;
        let store = IndexStore::open(&self.workspace.index_path())?;
        Ok((lock, store))
    }

    fn read_session(&self) -> Result<IndexStore> {
        ensure_unlocked(&self.workspace.lock_path())?;
        IndexStore::open_read_only(&self.workspace.index_path())
    }

    // ==================== scan ====================

    /// Incremental scan of `roots`, or of the recorded roots when empty.
    ///
    /// # Errors
    ///
    /// `LockHeld`, `CorruptIndex`, `InvalidRoot`, `Interrupted`, or an index
    /// failure. Per-file problems are counted in the summary.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanSummary> {
        let (_lock, mut store) = self.write_session()?;

        let roots = if roots.is_empty() {
            let recorded = store.roots()?;
            if recorded.is_empty() {
                vec![self.workspace.base_dir.clone()]
            } else {
                recorded
            }
        } else {
            roots.to_vec()
        };

        let mut scanner = Scanner::new(&self.settings);
        if let Some(flag) = &self.shutdown_flag {
            scanner = scanner.with_shutdown_flag(Arc::clone(flag));
        }
        if let Some(progress) = &self.progress {
            scanner = scanner.with_progress(Arc::clone(progress));
        }
        scanner.scan(&mut store, &roots)
    }

    // ==================== dedup ====================

    /// Run a resolution session, deleting through the filesystem.
    ///
    /// # Errors
    ///
    /// `LockHeld`, `CorruptIndex`, or an index failure.
    pub fn dedup<P: DecisionProvider>(&self, provider: P) -> Result<(DedupSummary, P)> {
        self.dedup_with(provider, FsRemover::from_settings(&self.settings))
    }

    /// Run a resolution session with a custom remover.
    ///
    /// # Errors
    ///
    /// As [`Dupler::dedup`].
    pub fn dedup_with<P: DecisionProvider, R: FileRemover>(
        &self,
        provider: P,
        remover: R,
    ) -> Result<(DedupSummary, P)> {
        let (_lock, store) = self.write_session()?;
        let mut session = ResolutionSession::new(&store, provider, remover);
        if let Some(flag) = &self.shutdown_flag {
            session = session.with_shutdown_flag(Arc::clone(flag));
        }
        session.run()
    }

    // ==================== find ====================

    /// Open a read-only query engine.
    ///
    /// # Errors
    ///
    /// `LockHeld` during a write session, `CorruptIndex`.
    pub fn query(&self) -> Result<QueryEngine> {
        QueryEngine::open(&self.workspace, &self.settings)
    }

    /// Every indexed path matching `pattern`, ordered by path.
    ///
    /// # Errors
    ///
    /// `InvalidPattern`, plus the errors of [`Dupler::query`].
    pub fn find(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let engine = self.query()?;
        engine.find_all(pattern)
    }

    // ==================== exclude ====================

    /// Current exclude patterns.
    #[must_use]
    pub fn exclude_list(&self) -> ExcludeList {
        ExcludeList {
            files: self.settings.exclude_files.clone(),
            directories: self.settings.exclude_directories.clone(),
        }
    }

    /// Add exclude patterns and persist them. Returns the newly added ones.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` for a pattern that does not compile (nothing is
    /// saved in that case), or a settings write failure.
    pub fn exclude_add(&mut self, patterns: &[String], directory: bool) -> Result<Vec<String>> {
        for pattern in patterns {
            ExcludeRules::validate(pattern).map_err(|reason| DuplerError::InvalidPattern {
                pattern: pattern.clone(),
                reason,
            })?;
        }
        self.edit_excludes(|settings| {
            patterns
                .iter()
                .filter(|p| settings.add_exclude(p, directory))
                .cloned()
                .collect()
        })
    }

    /// Remove exclude patterns and persist. Returns the ones actually removed.
    ///
    /// # Errors
    ///
    /// A settings read or write failure.
    pub fn exclude_remove(&mut self, patterns: &[String], directory: bool) -> Result<Vec<String>> {
        self.edit_excludes(|settings| {
            patterns
                .iter()
                .filter(|p| settings.remove_exclude(p, directory))
                .cloned()
                .collect()
        })
    }

    // Edits the file's own settings, so environment overrides never get persisted.
    fn edit_excludes(
        &mut self,
        edit: impl Fn(&mut Settings) -> Vec<String>,
    ) -> Result<Vec<String>> {
        let path = self.workspace.settings_path();
        let mut stored = Settings::load_file(&path)?;
        let changed = edit(&mut stored);
        if !changed.is_empty() {
            stored.save(&path)?;
            edit(&mut self.settings);
        }
        Ok(changed)
    }

    /// Check names against the skip rules a walk applies.
    #[must_use]
    pub fn exclude_test(&self, names: &[String], directory: bool) -> Vec<NameCheck> {
        let rules = ExcludeRules::new(
            &self.workspace.base_dir,
            &self.settings.exclude_files,
            &self.settings.exclude_directories,
        );
        names
            .iter()
            .map(|name| {
                let skipped = name == DATA_DIR_NAME
                    || (self.settings.skip_hidden && name.starts_with('.'))
                    || rules.is_excluded(Path::new(name), directory);
                NameCheck {
                    name: name.clone(),
                    valid: !skipped,
                }
            })
            .collect()
    }

    // ==================== gc ====================

    /// Purge records whose files no longer exist, without rescanning.
    ///
    /// # Errors
    ///
    /// `LockHeld`, `CorruptIndex`, or an index failure.
    pub fn gc(&self) -> Result<GcSummary> {
        let (_lock, mut store) = self.write_session()?;

        let mut summary = GcSummary::default();
        let mut dangling = Vec::new();
        for record in store.records() {
            let record = record?;
            summary.checked += 1;
            match fs::symlink_metadata(&record.path) {
                Ok(meta) if meta.is_dir() => dangling.push(record.path),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => dangling.push(record.path),
                Err(e) => log::warn!("Cannot check {}: {}", record.path.display(), e),
            }
        }

        summary.purged = store.delete_paths(&dangling)? as u64;
        log::info!(
            "Garbage collection: {} checked, {} purged",
            summary.checked,
            summary.purged
        );
        Ok(summary)
    }

    // ==================== status ====================

    /// Read-only index figures.
    ///
    /// # Errors
    ///
    /// `LockHeld` during a write session, `CorruptIndex`.
    pub fn status(&self) -> Result<IndexStatus> {
        let store = self.read_session()?;
        let keys = store.duplicate_keys()?;
        Ok(IndexStatus {
            base_dir: self.workspace.base_dir.clone(),
            generation: store.completed_generation()?,
            roots: store.roots()?,
            counts: store.counts()?,
            duplicates: GroupingStats::from_keys(&keys),
        })
    }
}
