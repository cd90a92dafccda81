//! File actions.
//!
//! Deletion of redundant copies, either to the system trash (recoverable)
//! or permanently, with re-verification against the index record.
//!
//! ```no_run
//! use dupler::actions::delete::permanent_delete;
//! use std::path::Path;
//!
//! let freed = permanent_delete(Path::new("/path/to/duplicate.txt"));
//! ```

pub mod delete;

pub use delete::{
    delete_to_trash, delete_verified, permanent_delete, validate_preserves_copy, DeleteError,
    Expected, FileRemover, FsRemover,
};
