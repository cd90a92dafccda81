use dupler::commands::Dupler;
use dupler::error::DuplerError;
use dupler::index::IndexStore;
use dupler::progress::{Phase, ProgressCallback};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn workspace() -> (TempDir, PathBuf, Dupler) {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    (dir, root, dupler)
}

fn store(dupler: &Dupler) -> IndexStore {
    IndexStore::open(&dupler.workspace().index_path()).unwrap()
}

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Raises the shutdown flag once `after` files have been walked.
struct TripAfter {
    flag: Arc<AtomicBool>,
    after: usize,
}

impl ProgressCallback for TripAfter {
    fn on_phase_start(&self, _phase: Phase, _total: usize) {}

    fn on_progress(&self, phase: Phase, current: usize, _path: &Path) {
        if phase == Phase::Walk && current >= self.after {
            self.flag.store(true, Ordering::SeqCst);
        }
    }

    fn on_phase_end(&self, _phase: Phase) {}
}

// ==================== Incremental Scan Tests ====================

#[test]
fn test_scan_empty_directory() {
    let (_dir, _root, dupler) = workspace();
    let summary = dupler.scan(&[]).unwrap();

    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.added, 0);
    assert_eq!(summary.generation, 1);
}

#[test]
fn test_rescan_unchanged_tree_is_idempotent() {
    let (_dir, root, dupler) = workspace();
    write(&root, "a.txt", "duplicate");
    write(&root, "b.txt", "duplicate");
    write(&root, "sub/c.txt", "unique");

    dupler.scan(&[]).unwrap();
    let before: Vec<_> = store(&dupler).records().map(Result::unwrap).collect();

    let summary = dupler.scan(&[]).unwrap();
    assert_eq!(summary.generation, 2);
    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.hashed, 0);

    let after: Vec<_> = store(&dupler).records().map(Result::unwrap).collect();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.path, new.path);
        assert_eq!(old.size, new.size);
        assert_eq!(old.mtime_ns, new.mtime_ns);
        assert_eq!(old.fingerprint, new.fingerprint);
        assert_eq!(new.generation, 2);
    }
}

#[test]
fn test_modified_file_is_updated_and_rehashed() {
    let (_dir, root, dupler) = workspace();
    let a = write(&root, "a.txt", "same-size-1");
    write(&root, "b.txt", "same-size-1");
    dupler.scan(&[]).unwrap();
    let original = store(&dupler).get(&a).unwrap().unwrap();

    fs::write(&a, "same-size-2").unwrap();
    set_file_mtime(&a, FileTime::from_unix_time(1_000_000, 0)).unwrap();

    let summary = dupler.scan(&[]).unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);

    let updated = store(&dupler).get(&a).unwrap().unwrap();
    assert_ne!(updated.mtime_ns, original.mtime_ns);
    assert_ne!(updated.prehash, original.prehash);
    assert!(updated.fingerprint.is_none());
}

#[test]
fn test_deleted_file_is_swept_on_next_scan() {
    let (_dir, root, dupler) = workspace();
    let gone = write(&root, "gone.txt", "bye");
    write(&root, "kept.txt", "stay");
    dupler.scan(&[]).unwrap();

    fs::remove_file(&gone).unwrap();
    let summary = dupler.scan(&[]).unwrap();

    assert_eq!(summary.removed, 1);
    assert!(store(&dupler).get(&gone).unwrap().is_none());
}

#[test]
fn test_scoped_scan_keeps_records_outside_roots() {
    let (_dir, root, dupler) = workspace();
    let left = write(&root, "left/a.txt", "left");
    let right = write(&root, "right/b.txt", "right side");
    dupler.scan(&[]).unwrap();

    fs::remove_file(&left).unwrap();
    let summary = dupler.scan(&[root.join("left")]).unwrap();

    assert_eq!(summary.removed, 1);
    let store = store(&dupler);
    assert!(store.get(&left).unwrap().is_none());
    let kept = store.get(&right).unwrap().unwrap();
    assert_eq!(kept.generation, 2);
}

// ==================== Walk Rule Tests ====================

#[test]
fn test_excluded_and_hidden_files_are_not_indexed() {
    let (_dir, root, mut dupler) = workspace();
    dupler.exclude_add(&["*.log".to_string()], false).unwrap();
    dupler.exclude_add(&["build".to_string()], true).unwrap();
    write(&root, "keep.txt", "k");
    write(&root, "debug.log", "l");
    write(&root, "build/out.bin", "b");
    write(&root, ".hidden", "h");

    let summary = dupler.scan(&[]).unwrap();
    assert_eq!(summary.scanned, 1);

    let paths: Vec<_> = store(&dupler)
        .records()
        .map(|r| r.unwrap().path)
        .collect();
    assert_eq!(paths, vec![root.join("keep.txt")]);
}

#[test]
fn test_data_directory_is_never_indexed() {
    let (_dir, root, dupler) = workspace();
    write(&root, "a.txt", "a");
    dupler.scan(&[]).unwrap();

    let store = store(&dupler);
    assert!(store
        .records()
        .map(Result::unwrap)
        .all(|r| !r.path.starts_with(&dupler.workspace().data_dir)));
}

#[test]
fn test_empty_files_are_indexed_but_not_grouped() {
    let (_dir, root, dupler) = workspace();
    write(&root, "e1", "");
    write(&root, "e2", "");
    dupler.scan(&[]).unwrap();

    let status = dupler.status().unwrap();
    assert_eq!(status.counts.records, 2);
    assert_eq!(status.duplicates.groups, 0);
}

#[cfg(unix)]
#[test]
fn test_symlink_loop_terminates() {
    let (_dir, root, dupler) = workspace();
    write(&root, "d/file.txt", "x");
    std::os::unix::fs::symlink(root.join("d"), root.join("d/loop")).unwrap();

    let mut settings = dupler.settings().clone();
    settings.follow_symlinks = true;
    let dupler = Dupler::with_settings(dupler.workspace().clone(), settings);

    let summary = dupler.scan(&[]).unwrap();
    assert_eq!(summary.scanned, 1);
}

// ==================== Failure Tests ====================

#[test]
fn test_invalid_root_aborts_before_writes() {
    let (_dir, root, dupler) = workspace();
    write(&root, "a.txt", "a");

    let err = dupler.scan(&[root.join("missing")]).unwrap_err();
    assert!(matches!(err, DuplerError::InvalidRoot(_)));
    assert_eq!(store(&dupler).completed_generation().unwrap(), 0);
}

#[test]
fn test_interrupted_scan_keeps_last_generation() {
    let (_dir, root, dupler) = workspace();
    write(&root, "a.txt", "a");
    dupler.scan(&[]).unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let interrupted = Dupler::open(&root).unwrap().with_shutdown_flag(flag);
    let err = interrupted.scan(&[]).unwrap_err();

    assert!(matches!(err, DuplerError::Interrupted));
    assert_eq!(store(&dupler).completed_generation().unwrap(), 1);
    assert!(!dupler.workspace().lock_path().exists());
}

#[test]
fn test_scan_after_mid_walk_interruption_sweeps_and_reuses_work() {
    let (_dir, root, dupler) = workspace();
    let keep1 = write(&root, "keep1.txt", "duplicate body");
    write(&root, "keep2.txt", "duplicate body");
    let first = dupler.scan(&[]).unwrap();
    assert_eq!(first.hashed, 4);
    let fingerprint = store(&dupler).get(&keep1).unwrap().unwrap().fingerprint;
    assert!(fingerprint.is_some());

    // Sorted walk order puts this file first.
    let ghost = write(&root, "a_new.txt", "walked then deleted");

    let mut settings = dupler.settings().clone();
    settings.commit_batch = 1;
    let flag = Arc::new(AtomicBool::new(false));
    let interrupted = Dupler::with_settings(dupler.workspace().clone(), settings)
        .with_shutdown_flag(Arc::clone(&flag))
        .with_progress(Arc::new(TripAfter {
            flag: Arc::clone(&flag),
            after: 1,
        }));

    let err = interrupted.scan(&[]).unwrap_err();
    assert!(matches!(err, DuplerError::Interrupted));
    assert!(store(&dupler).get(&ghost).unwrap().is_some());
    assert_eq!(store(&dupler).completed_generation().unwrap(), 1);

    fs::remove_file(&ghost).unwrap();
    let summary = dupler.scan(&[]).unwrap();

    assert_eq!(summary.removed, 1);
    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.hashed, 0);
    assert!(summary.generation > 2);
    let store = store(&dupler);
    assert!(store.get(&ghost).unwrap().is_none());
    assert_eq!(store.get(&keep1).unwrap().unwrap().fingerprint, fingerprint);
    assert_eq!(store.counts().unwrap().records, 2);
}
