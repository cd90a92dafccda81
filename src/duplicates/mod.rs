//! Duplicate grouping.
//!
//! Groups are derived from the index: every (fingerprint, size) shared by
//! two or more non-empty records forms exactly one [`DuplicateGroup`].

pub mod groups;

pub use groups::{
    group_records, groups, order_groups, sort_members, DuplicateGroup, DuplicateGroups,
    GroupingStats,
};
