//! Command-line interface definitions.
//!
//! Global options (verbosity, color, output format) come before or after
//! the subcommand; every subcommand works on the workspace discovered from
//! the current directory, except `init`, which creates one.
//!
//! ```bash
//! dupler init ~/Pictures
//! cd ~/Pictures && dupler scan
//! dupler find '%.jpg'
//! dupler dedup
//! dupler --json status
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental duplicate-file index with interactive deduplication.
#[derive(Debug, Parser)]
#[command(name = "dupler")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print command results as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Print fatal errors as a JSON object on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize an index for a directory
    Init(InitArgs),
    /// Scan files into the index (incremental)
    Scan(ScanArgs),
    /// Review duplicate groups and delete redundant copies
    Dedup(DedupArgs),
    /// Find indexed files by name pattern (`%` any run, `_` one character)
    Find(FindArgs),
    /// List, add, remove or test exclude patterns
    Exclude(ExcludeArgs),
    /// Purge index records whose files no longer exist
    Gc,
    /// Show index counts and duplicate totals
    Status,
    /// Remove a lock left behind by a crashed session
    Unlock,
}

/// Arguments for `init`.
#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Replace an existing index and clear a stale lock
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan (default: roots recorded at init)
    #[arg(value_name = "ROOT")]
    pub roots: Vec<PathBuf>,

    /// Do not show progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for `dedup`.
#[derive(Debug, Args)]
pub struct DedupArgs {
    /// Move deleted copies to the system trash instead of removing them
    #[arg(long)]
    pub trash: bool,

    /// Skip the size/mtime check before each deletion
    #[arg(long)]
    pub no_verify: bool,
}

/// Arguments for `find`.
#[derive(Debug, Args)]
pub struct FindArgs {
    /// Wildcard pattern; without `%` or `_` it matches as a substring
    #[arg(value_name = "PATTERN")]
    pub pattern: String,

    /// Match against the full path instead of the file name
    #[arg(long)]
    pub full_path: bool,

    /// Match case-sensitively
    #[arg(short = 'c', long)]
    pub case_sensitive: bool,
}

/// Arguments for `exclude`.
#[derive(Debug, Args)]
pub struct ExcludeArgs {
    /// Patterns or names; with none, the current patterns are listed
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Apply to directory patterns (default: file patterns)
    #[arg(short, long)]
    pub dir: bool,

    /// Remove the patterns instead of adding them
    #[arg(short, long, conflicts_with = "test")]
    pub remove: bool,

    /// Test whether names would be indexed instead of modifying patterns
    #[arg(short, long)]
    pub test: bool,
}
