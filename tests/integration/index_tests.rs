use dupler::commands::Dupler;
use dupler::error::DuplerError;
use dupler::index::{FileRecord, IndexStore};
use dupler::scanner::{Fingerprint, Hasher};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn record(path: &str, size: u64, generation: u64) -> FileRecord {
    FileRecord {
        path: PathBuf::from(path),
        size,
        mtime_ns: 1,
        prehash: None,
        fingerprint: None,
        generation,
    }
}

#[test]
fn test_records_persist_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.sqlite3");
    {
        let mut store = IndexStore::create(&path).unwrap();
        store.upsert(&record("/a", 1, 1)).unwrap();
        store.complete_generation(1, None).unwrap();
    }

    let store = IndexStore::open(&path).unwrap();
    assert_eq!(store.completed_generation().unwrap(), 1);
    assert_eq!(store.get(PathBuf::from("/a").as_path()).unwrap().unwrap().size, 1);
}

#[test]
fn test_sweep_is_all_or_nothing_per_generation() {
    let store_dir = tempdir().unwrap();
    let mut store = IndexStore::create(&store_dir.path().join("i.db")).unwrap();
    store.upsert(&record("/old1", 1, 1)).unwrap();
    store.upsert(&record("/old2", 2, 1)).unwrap();
    store.upsert(&record("/new", 3, 2)).unwrap();

    assert_eq!(store.sweep(2).unwrap(), 2);
    let remaining: Vec<_> = store.records().map(|r| r.unwrap().path).collect();
    assert_eq!(remaining, vec![PathBuf::from("/new")]);
}

#[test]
fn test_scan_fingerprints_match_hasher() {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("a"), "identical bytes").unwrap();
    fs::write(root.join("b"), "identical bytes").unwrap();
    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root).unwrap();
    dupler.scan(&[]).unwrap();

    let expected: Fingerprint = Hasher::new().fingerprint(&root.join("a"), 15).unwrap();
    let store = IndexStore::open(&dupler.workspace().index_path()).unwrap();
    for name in ["a", "b"] {
        let rec = store.get(&root.join(name)).unwrap().unwrap();
        assert_eq!(rec.fingerprint, Some(expected));
    }
}

#[test]
fn test_corrupt_index_requires_reinit() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let dupler = Dupler::open(dir.path()).unwrap();
    fs::write(dupler.workspace().index_path(), "garbage, not sqlite").unwrap();

    assert!(matches!(dupler.status(), Err(DuplerError::CorruptIndex { .. })));
    assert!(matches!(dupler.scan(&[]), Err(DuplerError::CorruptIndex { .. })));

    Dupler::init(dir.path(), true).unwrap();
    assert_eq!(dupler.status().unwrap().counts.records, 0);
}

#[test]
fn test_uninitialized_commands_fail() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Dupler::open(dir.path()),
        Err(DuplerError::NotInitialized(_))
    ));
}
