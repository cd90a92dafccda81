//! Persistent file index.
//!
//! The index is the sole owner of [`FileRecord`]s. It is a single SQLite
//! database under `.dupler/`, guarded by a single-writer lock file.
//!
//! * [`database`]: the [`IndexStore`] (records, generations, lazy queries)
//! * [`entry`]: the [`FileRecord`] model and timestamp conversion
//! * [`lock`]: the write-session [`WriteLock`]
//! * [`pattern`]: the `%` / `_` [`PatternMatcher`]

pub mod database;
pub mod entry;
pub mod lock;
pub mod pattern;

pub use database::{
    DigestKind, DigestUpdate, FingerprintGroups, GroupKey, IndexCounts, IndexStore, Records,
};
pub use entry::FileRecord;
pub use lock::WriteLock;
pub use pattern::PatternMatcher;
