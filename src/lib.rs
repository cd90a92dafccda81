//! Dupler - incremental duplicate file index
//!
//! Scans directory trees into a persistent SQLite index keyed by normalized
//! absolute path, fingerprints only the files whose size (then prehash)
//! collides, groups identical content, and walks an interactive resolution
//! session that deletes redundant copies from disk and index together.
//!
//! # Example
//!
//! ```no_run
//! use dupler::commands::Dupler;
//!
//! # fn main() -> dupler::error::Result<()> {
//! Dupler::init("/data/photos".as_ref(), false)?;
//! let dupler = Dupler::open("/data/photos".as_ref())?;
//! let summary = dupler.scan(&[])?;
//! println!("{} files added", summary.added);
//! for path in dupler.find("%.jpg")? {
//!     println!("{}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod duplicates;
pub mod error;
pub mod index;
pub mod logging;
pub mod progress;
pub mod prompt;
pub mod query;
pub mod scanner;
pub mod signal;

pub use app::run_app;
