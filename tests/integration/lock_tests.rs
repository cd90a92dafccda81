use dupler::commands::Dupler;
use dupler::dedup::{DecisionProvider, Presentation, ResolutionDecision};
use dupler::error::DuplerError;
use dupler::index::WriteLock;
use std::fs;
use tempfile::tempdir;

struct Unreachable;

impl DecisionProvider for Unreachable {
    fn decide(&mut self, _p: &Presentation<'_>) -> ResolutionDecision {
        panic!("no group should be presented while the index is locked");
    }
}

#[test]
fn test_second_writer_fails_fast_without_mutation() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "same").unwrap();
    fs::write(dir.path().join("b.txt"), "same").unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    dupler.scan(&[]).unwrap();

    let lock = WriteLock::acquire(&dupler.workspace().lock_path()).unwrap();

    assert!(matches!(dupler.scan(&[]), Err(DuplerError::LockHeld { .. })));
    assert!(matches!(
        dupler.dedup(Unreachable),
        Err(DuplerError::LockHeld { .. })
    ));
    assert!(matches!(dupler.gc(), Err(DuplerError::LockHeld { .. })));

    drop(lock);
    let status = dupler.status().unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.counts.records, 2);
    assert!(dir.path().join("b.txt").exists());
}

#[test]
fn test_lock_error_names_holder() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    fs::write(dupler.workspace().lock_path(), "pid 4242").unwrap();

    match dupler.scan(&[]) {
        Err(DuplerError::LockHeld { holder, .. }) => assert_eq!(holder, "pid 4242"),
        other => panic!("expected LockHeld, got {other:?}"),
    }
}

#[test]
fn test_lock_released_after_each_command() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();

    dupler.scan(&[]).unwrap();
    dupler.gc().unwrap();
    assert!(!dupler.workspace().lock_path().exists());
    dupler.scan(&[]).unwrap();
}

#[test]
fn test_init_force_does_not_steal_live_lock() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "same").unwrap();
    fs::write(dir.path().join("b.txt"), "same").unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    dupler.scan(&[]).unwrap();

    let lock_path = dupler.workspace().lock_path();
    let lock = WriteLock::acquire(&lock_path).unwrap();
    let err = Dupler::init(dir.path(), true).unwrap_err();
    assert!(matches!(err, DuplerError::LockHeld { .. }));
    assert!(lock_path.exists());

    drop(lock);
    assert!(!lock_path.exists());
    assert_eq!(dupler.status().unwrap().counts.records, 2);
}

#[test]
fn test_stale_lock_needs_explicit_unlock() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    fs::write(dupler.workspace().lock_path(), "pid 1").unwrap();

    assert!(matches!(
        Dupler::init(dir.path(), true),
        Err(DuplerError::LockHeld { .. })
    ));
    assert!(Dupler::unlock(dir.path()).unwrap());
    Dupler::init(dir.path(), true).unwrap();
    assert!(!dupler.workspace().lock_path().exists());
    dupler.scan(&[]).unwrap();
}
