use dupler::commands::Dupler;
use dupler::config::MatchTarget;
use dupler::error::DuplerError;
use std::fs;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

fn indexed(files: &[&str]) -> (TempDir, PathBuf, Dupler) {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    for (i, rel) in files.iter().enumerate() {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("content {i}")).unwrap();
    }
    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root).unwrap();
    dupler.scan(&[]).unwrap();
    (dir, root, dupler)
}

#[test]
fn test_find_percent_suffix() {
    let (_dir, root, dupler) = indexed(&["a.txt", "b.py", "lib/c.py", "lib/py.rs"]);
    assert_eq!(
        dupler.find("%.py").unwrap(),
        vec![root.join("b.py"), root.join("lib/c.py")]
    );
}

#[test]
fn test_find_underscore_single_char_stem() {
    let (_dir, root, dupler) = indexed(&["a.py", "ab.py", "x/b.py"]);
    assert_eq!(
        dupler.find("_.py").unwrap(),
        vec![root.join("a.py"), root.join("x/b.py")]
    );
}

#[test]
fn test_find_plain_text_is_substring() {
    let (_dir, root, dupler) = indexed(&["2023-Report-final.pdf", "notes.md"]);
    assert_eq!(
        dupler.find("report").unwrap(),
        vec![root.join("2023-Report-final.pdf")]
    );
}

#[test]
fn test_find_escaped_wildcard_is_literal() {
    let (_dir, root, dupler) = indexed(&["100%.txt", "100x.txt"]);
    assert_eq!(
        dupler.find("100\\%.txt").unwrap(),
        vec![root.join("100%.txt")]
    );
}

#[test]
fn test_find_full_path_target() {
    let (_dir, root, dupler) = indexed(&["src/main.rs", "docs/main.rs"]);
    let engine = dupler.query().unwrap().with_target(MatchTarget::Path);
    let matcher = engine.compile("%/src/%").unwrap();
    let found: Vec<_> = engine.find(&matcher).map(Result::unwrap).collect();
    assert_eq!(found, vec![root.join("src/main.rs")]);
}

#[test]
fn test_find_reflects_last_scan_only() {
    let (_dir, root, dupler) = indexed(&["old.py"]);
    fs::write(root.join("new.py"), "fresh").unwrap();
    fs::remove_file(root.join("old.py")).unwrap();

    // No rescan: the index still describes the last completed generation.
    assert_eq!(dupler.find("%.py").unwrap(), vec![root.join("old.py")]);

    dupler.scan(&[]).unwrap();
    assert_eq!(dupler.find("%.py").unwrap(), vec![root.join("new.py")]);
}

#[test]
fn test_find_invalid_patterns() {
    let (_dir, _root, dupler) = indexed(&["a"]);
    for pattern in ["", "abc\\"] {
        assert!(matches!(
            dupler.find(pattern),
            Err(DuplerError::InvalidPattern { .. })
        ));
    }
}
