use dupler::commands::Dupler;
use dupler::dedup::{DecisionProvider, Presentation, ResolutionDecision};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

struct KeepNamed {
    keep: PathBuf,
    presented: Vec<Vec<PathBuf>>,
}

impl DecisionProvider for KeepNamed {
    fn decide(&mut self, p: &Presentation<'_>) -> ResolutionDecision {
        let mut paths = p.group.paths();
        paths.sort();
        self.presented.push(paths);
        ResolutionDecision::KeepOne(self.keep.clone())
    }
}

#[test]
fn test_init_scan_find_dedup() {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let c = root.join("c.py");
    fs::write(&a, "content X").unwrap();
    fs::write(&b, "content X").unwrap();
    fs::write(&c, "content Y, different").unwrap();
    let size_b = fs::metadata(&b).unwrap().len();

    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root).unwrap();
    let scan = dupler.scan(&[]).unwrap();
    assert_eq!(scan.added, 3);
    assert_eq!(scan.errors, 0);

    assert_eq!(dupler.find("%.py").unwrap(), vec![c.clone()]);

    let provider = KeepNamed {
        keep: a.clone(),
        presented: Vec::new(),
    };
    let (summary, provider) = dupler.dedup(provider).unwrap();

    assert_eq!(provider.presented, vec![vec![a.clone(), b.clone()]]);
    assert_eq!(summary.groups_presented, 1);
    assert_eq!(summary.files_deleted, 1);
    assert_eq!(summary.bytes_reclaimed, size_b);
    assert!(summary.failures.is_empty());

    assert!(a.exists());
    assert!(!b.exists());
    assert!(c.exists());
    assert!(dupler.find("b.txt").unwrap().is_empty());
    assert_eq!(dupler.find("%.txt").unwrap(), vec![a]);
}

#[test]
fn test_workspace_discovered_from_subdirectory() {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::create_dir_all(root.join("deep/er")).unwrap();
    fs::write(root.join("deep/er/file.py"), "print()").unwrap();

    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root.join("deep/er")).unwrap();
    assert_eq!(dupler.workspace().base_dir, root);

    // Default roots are the initialized root, not the current directory.
    dupler.scan(&[]).unwrap();
    assert_eq!(dupler.find("%.py").unwrap(), vec![root.join("deep/er/file.py")]);
}

#[test]
fn test_gc_then_status() {
    let dir = tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    fs::write(root.join("a"), "same").unwrap();
    fs::write(root.join("b"), "same").unwrap();
    Dupler::init(&root, false).unwrap();
    let dupler = Dupler::open(&root).unwrap();
    dupler.scan(&[]).unwrap();
    assert_eq!(dupler.status().unwrap().duplicates.groups, 1);

    fs::remove_file(root.join("b")).unwrap();
    assert_eq!(dupler.gc().unwrap().purged, 1);

    let status = dupler.status().unwrap();
    assert_eq!(status.counts.records, 1);
    assert_eq!(status.duplicates.groups, 0);
    assert_eq!(status.roots, vec![root]);
}
