//! Duplicate groups and their deterministic ordering.
//!
//! # Ordering
//!
//! Groups come out by descending reclaimable bytes (what deleting all but
//! one copy would free), ties broken by ascending fingerprint. Inside a
//! group, members are ordered by ascending modification time then path, so
//! the first member is the oldest copy. That first member is only a
//! suggestion: nothing is ever kept or deleted without a decision.
//!
//! # Example
//!
//! ```
//! use dupler::duplicates::group_records;
//! use dupler::index::FileRecord;
//! use dupler::scanner::Fingerprint;
//! use std::path::PathBuf;
//!
//! let fp = Fingerprint::from_bytes([7; 32]);
//! let record = |path: &str, mtime_ns: i64| FileRecord {
//!     path: PathBuf::from(path),
//!     size: 100,
//!     mtime_ns,
//!     prehash: Some(fp),
//!     fingerprint: Some(fp),
//!     generation: 1,
//! };
//!
//! let groups = group_records(vec![record("/b/copy.txt", 20), record("/a/orig.txt", 10)]);
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].members[0].path, PathBuf::from("/a/orig.txt"));
//! assert_eq!(groups[0].reclaimable_bytes(), 100);
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::index::{FileRecord, FingerprintGroups, GroupKey, IndexStore};
use crate::scanner::Fingerprint;

/// Records sharing one fingerprint and one size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Shared content fingerprint
    pub fingerprint: Fingerprint,
    /// Shared size in bytes
    pub size: u64,
    /// Members, oldest first
    pub members: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Build a group; members are put in canonical order.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, size: u64, mut members: Vec<FileRecord>) -> Self {
        sort_members(&mut members);
        Self {
            fingerprint,
            size,
            members,
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sum of all member sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.size.saturating_mul(self.members.len() as u64)
    }

    /// Bytes freed by keeping exactly one copy.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size
            .saturating_mul(self.members.len().saturating_sub(1) as u64)
    }

    /// Member paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }

    /// The member stored under `path`.
    #[must_use]
    pub fn member(&self, path: &Path) -> Option<&FileRecord> {
        self.members.iter().find(|m| m.path == path)
    }

    /// Whether `path` is a member.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.member(path).is_some()
    }

    /// The default keep suggestion: the oldest member.
    #[must_use]
    pub fn oldest(&self) -> Option<&FileRecord> {
        self.members.first()
    }

    /// Distinct parent directories of the members.
    #[must_use]
    pub fn directories(&self) -> BTreeSet<PathBuf> {
        self.members
            .iter()
            .filter_map(|m| m.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Whether every member has the same file name.
    #[must_use]
    pub fn shares_file_name(&self) -> bool {
        let mut names = self.members.iter().map(|m| m.path.file_name());
        match names.next() {
            Some(Some(first)) => names.all(|n| n == Some(first)),
            _ => false,
        }
    }
}

/// Sort members by ascending mtime, then path.
pub fn sort_members(members: &mut [FileRecord]) {
    members.sort_by(|a, b| {
        a.mtime_ns
            .cmp(&b.mtime_ns)
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn compare_order(
    a_reclaimable: u64,
    a_fp: &Fingerprint,
    a_size: u64,
    b_reclaimable: u64,
    b_fp: &Fingerprint,
    b_size: u64,
) -> Ordering {
    b_reclaimable
        .cmp(&a_reclaimable)
        .then_with(|| a_fp.cmp(b_fp))
        .then_with(|| a_size.cmp(&b_size))
}

/// Put groups in presentation order.
pub fn order_groups(groups: &mut [DuplicateGroup]) {
    groups.sort_by(|a, b| {
        compare_order(
            a.reclaimable_bytes(),
            &a.fingerprint,
            a.size,
            b.reclaimable_bytes(),
            &b.fingerprint,
            b.size,
        )
    });
}

/// Group in-memory records.
///
/// Records without a fingerprint and zero-byte records are never grouped.
#[must_use]
pub fn group_records(records: impl IntoIterator<Item = FileRecord>) -> Vec<DuplicateGroup> {
    let mut buckets: HashMap<(Fingerprint, u64), Vec<FileRecord>> = HashMap::new();
    for record in records {
        if record.size == 0 {
            continue;
        }
        if let Some(fp) = record.fingerprint {
            buckets.entry((fp, record.size)).or_default().push(record);
        }
    }

    let mut groups: Vec<DuplicateGroup> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|((fp, size), members)| DuplicateGroup::new(fp, size, members))
        .collect();
    order_groups(&mut groups);
    groups
}

/// Aggregate figures over all duplicate groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupingStats {
    /// Number of duplicate groups
    pub groups: u64,
    /// Records that belong to a group
    pub duplicate_files: u64,
    /// Bytes freed if every group kept one copy
    pub reclaimable_bytes: u64,
}

impl GroupingStats {
    /// Summarize group keys.
    #[must_use]
    pub fn from_keys(keys: &[GroupKey]) -> Self {
        keys.iter().fold(Self::default(), |mut stats, key| {
            stats.groups += 1;
            stats.duplicate_files += key.count as u64;
            stats.reclaimable_bytes = stats.reclaimable_bytes.saturating_add(key.reclaimable_bytes());
            stats
        })
    }
}

/// Lazy, ordered sequence of duplicate groups read from an index.
///
/// Group keys are ordered up front; each group's members are read when the
/// group is reached, so members purged by earlier decisions are not seen.
pub struct DuplicateGroups<'a> {
    inner: FingerprintGroups<'a>,
    total: usize,
}

impl DuplicateGroups<'_> {
    /// Number of groups known when the sequence was created.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for DuplicateGroups<'_> {
    type Item = Result<DuplicateGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|group| {
            group.map(|(key, members)| DuplicateGroup::new(key.fingerprint, key.size, members))
        })
    }
}

/// Ordered duplicate groups of `store`.
///
/// # Errors
///
/// Fails if the group keys cannot be read.
pub fn groups(store: &IndexStore) -> Result<DuplicateGroups<'_>> {
    let inner = store.groups_by_fingerprint()?;
    let total = inner.remaining_keys();
    log::info!("Found {} duplicate group(s)", total);
    Ok(DuplicateGroups { inner, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    fn record(path: &str, size: u64, fingerprint: Option<Fingerprint>, mtime_ns: i64) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            mtime_ns,
            prehash: fingerprint,
            fingerprint,
            generation: 1,
        }
    }

    // ==================== DuplicateGroup Tests ====================

    #[test]
    fn test_group_metrics() {
        let group = DuplicateGroup::new(
            fp(1),
            100,
            vec![
                record("/a/x", 100, Some(fp(1)), 3),
                record("/b/x", 100, Some(fp(1)), 1),
                record("/c/x", 100, Some(fp(1)), 2),
            ],
        );
        assert_eq!(group.len(), 3);
        assert_eq!(group.total_size(), 300);
        assert_eq!(group.reclaimable_bytes(), 200);
        assert_eq!(group.oldest().unwrap().path, PathBuf::from("/b/x"));
        assert!(group.contains(Path::new("/c/x")));
        assert!(!group.contains(Path::new("/d/x")));
        assert!(group.shares_file_name());
        assert_eq!(group.directories().len(), 3);
    }

    #[test]
    fn test_members_ordered_by_mtime_then_path() {
        let group = DuplicateGroup::new(
            fp(1),
            1,
            vec![
                record("/z", 1, Some(fp(1)), 5),
                record("/b", 1, Some(fp(1)), 5),
                record("/a", 1, Some(fp(1)), 9),
            ],
        );
        assert_eq!(
            group.paths(),
            vec![PathBuf::from("/b"), PathBuf::from("/z"), PathBuf::from("/a")]
        );
    }

    #[test]
    fn test_shares_file_name() {
        let group = DuplicateGroup::new(
            fp(1),
            1,
            vec![
                record("/a/one.txt", 1, Some(fp(1)), 1),
                record("/b/two.txt", 1, Some(fp(1)), 2),
            ],
        );
        assert!(!group.shares_file_name());
    }

    // ==================== Grouping Tests ====================

    #[test]
    fn test_group_records_orders_by_reclaimable_then_fingerprint() {
        let records = vec![
            record("/s1", 10, Some(fp(9)), 1),
            record("/s2", 10, Some(fp(9)), 1),
            record("/b1", 500, Some(fp(5)), 1),
            record("/b2", 500, Some(fp(5)), 1),
            record("/t1", 10, Some(fp(2)), 1),
            record("/t2", 10, Some(fp(2)), 1),
        ];
        let groups = group_records(records);
        let order: Vec<_> = groups.iter().map(|g| g.fingerprint).collect();
        assert_eq!(order, vec![fp(5), fp(2), fp(9)]);
    }

    #[test]
    fn test_group_records_skips_singletons_empty_and_unhashed() {
        let records = vec![
            record("/single", 10, Some(fp(1)), 1),
            record("/e1", 0, Some(fp(2)), 1),
            record("/e2", 0, Some(fp(2)), 1),
            record("/u1", 10, None, 1),
            record("/u2", 10, None, 1),
        ];
        assert!(group_records(records).is_empty());
    }

    #[test]
    fn test_same_fingerprint_different_size_not_grouped() {
        let records = vec![
            record("/a", 10, Some(fp(1)), 1),
            record("/b", 11, Some(fp(1)), 1),
        ];
        assert!(group_records(records).is_empty());
    }

    #[test]
    fn test_grouping_stats_from_keys() {
        let keys = vec![
            GroupKey {
                fingerprint: fp(1),
                size: 10,
                count: 3,
            },
            GroupKey {
                fingerprint: fp(2),
                size: 5,
                count: 2,
            },
        ];
        let stats = GroupingStats::from_keys(&keys);
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.duplicate_files, 5);
        assert_eq!(stats.reclaimable_bytes, 25);
    }

    // ==================== Store-backed Tests ====================

    #[test]
    fn test_groups_from_store_in_order() {
        let store = IndexStore::open_in_memory().unwrap();
        for r in [
            record("/small/1", 10, Some(fp(1)), 1),
            record("/small/2", 10, Some(fp(1)), 2),
            record("/big/1", 1000, Some(fp(8)), 2),
            record("/big/2", 1000, Some(fp(8)), 1),
            record("/unique", 1000, Some(fp(3)), 1),
        ] {
            store.upsert(&r).unwrap();
        }

        let sequence = groups(&store).unwrap();
        assert_eq!(sequence.total(), 2);
        let collected: Vec<_> = sequence.map(Result::unwrap).collect();
        assert_eq!(collected[0].size, 1000);
        assert_eq!(
            collected[0].paths(),
            vec![PathBuf::from("/big/2"), PathBuf::from("/big/1")]
        );
        assert_eq!(collected[1].size, 10);
    }
}
