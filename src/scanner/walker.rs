//! Directory walker with real-path tracking.
//!
//! # Overview
//!
//! [`Walker`] lazily traverses one or more roots and yields a [`FileEntry`]
//! per regular file. The walk is finite and restartable: every call to
//! [`Walker::walk`] starts from scratch, and dropping the iterator early is a
//! clean cancellation.
//!
//! # Features
//!
//! - Deterministic order (children sorted by file name)
//! - Canonical directory tracking: a directory reached twice (symlink loop,
//!   overlapping roots) is pruned, so traversal always terminates
//! - Gitignore-style exclude patterns for files and directories
//! - Hidden entry filtering and the `.dupler` data directory always skipped
//! - Graceful shutdown via atomic flag
//!
//! # Example
//!
//! ```no_run
//! use dupler::scanner::{Walker, WalkerConfig};
//! use std::path::PathBuf;
//!
//! let config = WalkerConfig {
//!     skip_hidden: true,
//!     exclude_files: vec!["*.tmp".to_string()],
//!     ..Default::default()
//! };
//!
//! let walker = Walker::new(vec![PathBuf::from("/home/user/Downloads")], config);
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use super::path_utils;
use super::{FileEntry, ScanError, WalkerConfig};
use crate::config::DATA_DIR_NAME;

/// Compiled exclude patterns for one root.
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    files: Option<Gitignore>,
    directories: Option<Gitignore>,
}

impl ExcludeRules {
    /// Compile file and directory patterns relative to `root`.
    ///
    /// Invalid patterns are logged and skipped.
    #[must_use]
    pub fn new(root: &Path, file_patterns: &[String], dir_patterns: &[String]) -> Self {
        Self {
            files: build_gitignore(root, file_patterns),
            directories: build_gitignore(root, dir_patterns),
        }
    }

    /// Check a path (relative to the root) against the rules.
    #[must_use]
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        let rules = if is_dir {
            &self.directories
        } else {
            &self.files
        };
        rules
            .as_ref()
            .is_some_and(|gi| gi.matched(relative, is_dir).is_ignore())
    }

    /// Check whether `pattern` compiles as an exclude pattern.
    ///
    /// # Errors
    ///
    /// Returns the parser message for an invalid pattern.
    pub fn validate(pattern: &str) -> Result<(), String> {
        let mut builder = GitignoreBuilder::new("/");
        builder
            .add_line(None, pattern)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn build_gitignore(root: &Path, patterns: &[String]) -> Option<Gitignore> {
    if patterns.is_empty() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            log::warn!("Invalid exclude pattern '{}': {}", pattern, e);
        }
    }

    match builder.build() {
        Ok(gitignore) if !gitignore.is_empty() => Some(gitignore),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Failed to build exclude patterns: {}", e);
            None
        }
    }
}

/// Lazy directory walker over a set of roots.
#[derive(Debug)]
pub struct Walker {
    roots: Vec<PathBuf>,
    config: WalkerConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a walker for the given roots.
    ///
    /// Roots should already be absolute and canonical; the scan pipeline
    /// normalizes them before walking.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, config: WalkerConfig) -> Self {
        Self {
            roots,
            config,
            shutdown_flag: None,
        }
    }

    /// Stop iteration as soon as `flag` becomes true.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Walk all roots, yielding file entries.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            walker: self,
            pending: self.roots.clone().into_iter(),
            current: None,
            seen_dirs: HashSet::new(),
            seen_files: HashSet::new(),
        }
    }

    fn is_hidden(&self, name: &OsStr) -> bool {
        self.config.skip_hidden && name.to_string_lossy().starts_with('.')
    }

    fn skip_directory(&self, name: &OsStr, relative: &Path, rules: &ExcludeRules) -> bool {
        if name == DATA_DIR_NAME {
            return true;
        }
        if self.is_hidden(name) {
            log::trace!("Skipping hidden directory: {}", relative.display());
            return true;
        }
        if rules.is_excluded(relative, true) {
            log::trace!("Excluding directory: {}", relative.display());
            return true;
        }
        false
    }

    fn skip_file(&self, name: &OsStr, relative: &Path, rules: &ExcludeRules) -> bool {
        if self.is_hidden(name) {
            log::trace!("Skipping hidden file: {}", relative.display());
            return true;
        }
        if rules.is_excluded(relative, false) {
            log::trace!("Excluding file: {}", relative.display());
            return true;
        }
        false
    }
}

struct RootWalk {
    root: PathBuf,
    rules: ExcludeRules,
    entries: walkdir::IntoIter,
}

/// Iterator returned by [`Walker::walk`].
pub struct Walk<'a> {
    walker: &'a Walker,
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<RootWalk>,
    seen_dirs: HashSet<PathBuf>,
    seen_files: HashSet<PathBuf>,
}

impl Iterator for Walk<'_> {
    type Item = Result<FileEntry, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker;
        let follow = walker.config.follow_symlinks;

        loop {
            if walker.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            let Some(current) = self.current.as_mut() else {
                let root = self.pending.next()?;
                log::debug!("Walking root {}", root.display());
                self.current = Some(RootWalk {
                    rules: ExcludeRules::new(
                        &root,
                        &walker.config.exclude_files,
                        &walker.config.exclude_directories,
                    ),
                    entries: WalkDir::new(&root)
                        .follow_links(follow)
                        .sort_by_file_name()
                        .into_iter(),
                    root,
                });
                continue;
            };

            let entry = match current.entries.next() {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Err(e)) => {
                    if let Some(ancestor) = e.loop_ancestor() {
                        log::debug!("Pruning symlink loop back to {}", ancestor.display());
                        continue;
                    }
                    let path = e
                        .path()
                        .map_or_else(|| current.root.clone(), Path::to_path_buf);
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                    log::warn!("Walker error for {}: {}", path.display(), source);
                    return Some(Err(ScanError::from_io(path, source)));
                }
                Some(Ok(entry)) => entry,
            };

            let relative = entry
                .path()
                .strip_prefix(&current.root)
                .unwrap_or_else(|_| entry.path());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.depth() > 0
                    && walker.skip_directory(entry.file_name(), relative, &current.rules)
                {
                    current.entries.skip_current_dir();
                    continue;
                }
                match path_utils::normalize_absolute(entry.path()) {
                    Ok(real) => {
                        if !self.seen_dirs.insert(real) {
                            log::debug!("Already visited: {}", entry.path().display());
                            current.entries.skip_current_dir();
                        }
                    }
                    Err(e) => {
                        current.entries.skip_current_dir();
                        return Some(Err(ScanError::from_io(entry.path().to_path_buf(), e)));
                    }
                }
                continue;
            }

            if !file_type.is_file() {
                log::trace!("Skipping non-regular entry: {}", entry.path().display());
                continue;
            }

            if walker.skip_file(entry.file_name(), relative, &current.rules) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                    return Some(Err(ScanError::from_io(entry.path().to_path_buf(), source)));
                }
            };

            let path = if follow {
                match path_utils::normalize_absolute(entry.path()) {
                    Ok(real) => {
                        if !self.seen_files.insert(real.clone()) {
                            log::trace!("Already emitted: {}", real.display());
                            continue;
                        }
                        real
                    }
                    Err(e) => {
                        return Some(Err(ScanError::from_io(entry.path().to_path_buf(), e)))
                    }
                }
            } else {
                path_utils::normalize_pathbuf(entry.path())
            };

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            return Some(Ok(FileEntry::new(path, metadata.len(), modified)));
        }
    }
}
