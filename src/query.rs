//! Read-only pattern queries over the index.
//!
//! Results reflect the last completed scan and may be stale relative to the
//! live filesystem: a query never walks or hashes anything.
//!
//! ```no_run
//! use dupler::config::Workspace;
//! use dupler::query::QueryEngine;
//!
//! # fn main() -> dupler::error::Result<()> {
//! let workspace = Workspace::discover(&std::env::current_dir().unwrap())?;
//! let engine = QueryEngine::open(&workspace, &workspace.load_settings()?)?;
//! for path in engine.find_all("%.py")? {
//!     println!("{}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::config::{MatchTarget, Settings, Workspace};
use crate::error::Result;
use crate::index::lock::ensure_unlocked;
use crate::index::{IndexStore, PatternMatcher, Records};

/// Pattern lookups against an opened index.
#[derive(Debug)]
pub struct QueryEngine {
    store: IndexStore,
    target: MatchTarget,
    case_sensitive: bool,
}

impl QueryEngine {
    /// Wrap an opened store, matching basenames case-insensitively.
    #[must_use]
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            target: MatchTarget::default(),
            case_sensitive: false,
        }
    }

    /// Open the workspace index for reading.
    ///
    /// # Errors
    ///
    /// `LockHeld` while a write session is active, `CorruptIndex` if the
    /// index cannot be opened.
    pub fn open(workspace: &Workspace, settings: &Settings) -> Result<Self> {
        ensure_unlocked(&workspace.lock_path())?;
        let store = IndexStore::open_read_only(&workspace.index_path())?;
        Ok(Self::new(store)
            .with_target(settings.match_target)
            .with_case_sensitive(settings.case_sensitive))
    }

    /// Match against basenames or full paths.
    #[must_use]
    pub fn with_target(mut self, target: MatchTarget) -> Self {
        self.target = target;
        self
    }

    /// Enable case-sensitive matching.
    #[must_use]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Compile `pattern` with this engine's target and case rules.
    ///
    /// # Errors
    ///
    /// `InvalidPattern`.
    pub fn compile(&self, pattern: &str) -> Result<PatternMatcher> {
        PatternMatcher::compile(pattern, self.target, self.case_sensitive)
    }

    /// Lazily yield indexed paths matching `matcher`, ordered by path.
    #[must_use]
    pub fn find<'a>(&'a self, matcher: &'a PatternMatcher) -> Matches<'a> {
        log::debug!("Querying index for {:?} ({:?})", matcher.source(), matcher.target());
        Matches {
            records: self.store.query_by_pattern(matcher),
        }
    }

    /// Compile `pattern` and collect every match.
    ///
    /// # Errors
    ///
    /// `InvalidPattern`, or an index read error.
    pub fn find_all(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let matcher = self.compile(pattern)?;
        self.find(&matcher).collect()
    }
}

/// Lazy sequence of matching paths.
pub struct Matches<'a> {
    records: Records<'a>,
}

impl Iterator for Matches<'_> {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next().map(|r| r.map(|record| record.path))
    }
}
