use dupler::commands::Dupler;
use dupler::config::{DeleteMode, MatchTarget, Settings, Workspace};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_init_writes_default_settings() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let workspace = Workspace::at(dir.path()).unwrap();

    let settings = Settings::load_file(&workspace.settings_path()).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_settings_file_is_honored() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let workspace = Workspace::at(dir.path()).unwrap();
    fs::write(
        workspace.settings_path(),
        "match_target = \"path\"\ncase_sensitive = true\ndelete_mode = \"trash\"\nexclude_files = [\"*.bak\"]\n",
    )
    .unwrap();

    let dupler = Dupler::open(dir.path()).unwrap();
    let settings = dupler.settings();
    assert_eq!(settings.match_target, MatchTarget::Path);
    assert!(settings.case_sensitive);
    assert_eq!(settings.delete_mode, DeleteMode::Trash);
    assert_eq!(settings.exclude_files, vec!["*.bak".to_string()]);
}

#[test]
fn test_force_init_keeps_settings() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let mut dupler = Dupler::open(dir.path()).unwrap();
    dupler.exclude_add(&["*.tmp".to_string()], false).unwrap();

    Dupler::init(dir.path(), true).unwrap();
    let reopened = Dupler::open(dir.path()).unwrap();
    assert_eq!(reopened.exclude_list().files, vec!["*.tmp".to_string()]);
}

#[test]
fn test_invalid_settings_file_is_an_error() {
    let dir = tempdir().unwrap();
    Dupler::init(dir.path(), false).unwrap();
    let workspace = Workspace::at(dir.path()).unwrap();
    fs::write(workspace.settings_path(), "workers = \"many\"\n").unwrap();

    assert!(Dupler::open(dir.path()).is_err());
}
