use dupler::actions::{DeleteError, FileRemover, FsRemover};
use dupler::commands::Dupler;
use dupler::dedup::{
    DecisionProvider, FailureKind, Presentation, ResolutionDecision,
};
use dupler::index::{FileRecord, IndexStore};
use filetime::{set_file_mtime, FileTime};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// Replays decisions; records what was shown.
struct Script {
    decisions: VecDeque<ResolutionDecision>,
    shown: Vec<Vec<PathBuf>>,
}

impl Script {
    fn new(decisions: Vec<ResolutionDecision>) -> Self {
        Self {
            decisions: decisions.into(),
            shown: Vec::new(),
        }
    }
}

impl DecisionProvider for Script {
    fn decide(&mut self, p: &Presentation<'_>) -> ResolutionDecision {
        self.shown.push(p.group.paths());
        self.decisions.pop_front().unwrap_or(ResolutionDecision::Abort)
    }
}

/// Refuses one path, deletes everything else.
struct Refusing(PathBuf);

impl FileRemover for Refusing {
    fn remove(&self, record: &FileRecord) -> Result<u64, DeleteError> {
        if record.path == self.0 {
            return Err(DeleteError::PermissionDenied(record.path.clone()));
        }
        FsRemover::default().remove(record)
    }
}

fn scanned(files: &[(&str, &str, i64)]) -> (TempDir, PathBuf, Dupler) {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    for (rel, content, mtime) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(*mtime, 0)).unwrap();
    }
    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root).unwrap();
    dupler.scan(&[]).unwrap();
    (dir, root, dupler)
}

fn indexed(dupler: &Dupler, path: &Path) -> bool {
    IndexStore::open(&dupler.workspace().index_path())
        .unwrap()
        .get(path)
        .unwrap()
        .is_some()
}

// ==================== Presentation Tests ====================

#[test]
fn test_groups_presented_largest_first_oldest_member_first() {
    let (_dir, root, dupler) = scanned(&[
        ("small-new", "tiny", 200),
        ("small-old", "tiny", 100),
        ("big-b", "a much bigger payload", 100),
        ("big-a", "a much bigger payload", 100),
    ]);

    let (summary, script) = dupler
        .dedup(Script::new(vec![ResolutionDecision::Skip, ResolutionDecision::Skip]))
        .unwrap();

    assert_eq!(summary.groups_presented, 2);
    assert_eq!(
        script.shown,
        vec![
            vec![root.join("big-a"), root.join("big-b")],
            vec![root.join("small-old"), root.join("small-new")],
        ]
    );
}

#[test]
fn test_unique_files_never_presented() {
    let (_dir, _root, dupler) = scanned(&[("a", "one", 1), ("b", "two!", 1)]);
    let (summary, script) = dupler.dedup(Script::new(vec![])).unwrap();
    assert_eq!(summary.groups_presented, 0);
    assert!(script.shown.is_empty());
    assert!(!summary.aborted);
}

// ==================== Apply Tests ====================

#[test]
fn test_keep_many_deletes_the_rest() {
    let (_dir, root, dupler) = scanned(&[("a", "dup", 1), ("b", "dup", 2), ("c", "dup", 3)]);
    let keep = vec![root.join("a"), root.join("c")];

    let (summary, _) = dupler
        .dedup(Script::new(vec![ResolutionDecision::KeepMany(keep)]))
        .unwrap();

    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.bytes_reclaimed, 3);
    assert!(!root.join("b").exists());
    assert!(!indexed(&dupler, &root.join("b")));
    assert!(indexed(&dupler, &root.join("a")));
}

#[test]
fn test_failed_deletion_keeps_file_and_record() {
    let (_dir, root, dupler) = scanned(&[("a", "dup", 1), ("b", "dup", 2), ("c", "dup", 3)]);
    let refused = root.join("b");

    let (summary, _) = dupler
        .dedup_with(
            Script::new(vec![ResolutionDecision::KeepOne(root.join("a"))]),
            Refusing(refused.clone()),
        )
        .unwrap();

    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, FailureKind::DeleteFailed);
    assert!(refused.exists());
    assert!(indexed(&dupler, &refused));
    assert!(!root.join("c").exists());
    assert!(!indexed(&dupler, &root.join("c")));
}

#[test]
fn test_modified_copy_is_refused() {
    let (_dir, root, dupler) = scanned(&[("a", "dup", 1), ("b", "dup", 2)]);
    fs::write(root.join("b"), "changed since scan").unwrap();

    let (summary, _) = dupler
        .dedup(Script::new(vec![ResolutionDecision::KeepOne(root.join("a"))]))
        .unwrap();

    assert_eq!(summary.files_deleted, 0);
    assert_eq!(summary.failures[0].kind, FailureKind::Modified);
    assert!(root.join("b").exists());
    assert!(indexed(&dupler, &root.join("b")));
}

#[test]
fn test_abort_leaves_remaining_groups() {
    let (_dir, root, dupler) = scanned(&[
        ("x1", "first group payload", 1),
        ("x2", "first group payload", 2),
        ("y1", "second", 1),
        ("y2", "second", 2),
    ]);

    let (summary, script) = dupler
        .dedup(Script::new(vec![
            ResolutionDecision::KeepOne(root.join("x1")),
            ResolutionDecision::Abort,
        ]))
        .unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.groups_presented, 2);
    assert_eq!(script.shown.len(), 2);
    assert!(!root.join("x2").exists());
    assert!(root.join("y1").exists() && root.join("y2").exists());
    assert_eq!(dupler.status().unwrap().duplicates.groups, 1);
}

#[test]
fn test_session_after_resolution_has_nothing_left() {
    let (_dir, root, dupler) = scanned(&[("a", "dup", 1), ("b", "dup", 2)]);
    dupler
        .dedup(Script::new(vec![ResolutionDecision::KeepOne(root.join("b"))]))
        .unwrap();

    let (summary, _) = dupler.dedup(Script::new(vec![])).unwrap();
    assert_eq!(summary.groups_presented, 0);
    assert!(root.join("b").exists());
}
