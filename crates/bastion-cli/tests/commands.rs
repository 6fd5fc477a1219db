//! Integration tests for the command layer against a real save directory.

use std::fs;
use std::sync::Arc;

use bastion_cli::commands;
use bastion_persistence::chaos::truncate_file;
use bastion_persistence::{
    PersistenceConfig, PersistentSystem, SaveOrchestrator, SaveVersion, TreeValue, VerifyOptions,
};
use tempfile::{TempDir, tempdir};

struct Fixed(TreeValue);

impl PersistentSystem for Fixed {
    fn name(&self) -> &str {
        "realm"
    }

    fn serialize(&self, _version: &SaveVersion) -> Option<TreeValue> {
        Some(self.0.clone())
    }

    fn deserialize(&self, _data: &TreeValue, _version: &SaveVersion) -> bool {
        true
    }
}

/// A directory with `alpha` (saved twice) and `beta`.
fn populated() -> TempDir {
    let dir = tempdir().unwrap();
    let game = SaveOrchestrator::new(PersistenceConfig::new(dir.path()), SaveVersion::new(1, 0, 0))
        .unwrap();
    game.register_system(Arc::new(Fixed(TreeValue::object().with("turn", 3))));
    assert!(game.save_game("alpha").is_success());
    assert!(game.save_game("alpha").is_success());
    assert!(game.save_game("beta").is_success());
    dir
}

fn open(dir: &TempDir) -> SaveOrchestrator {
    commands::open(dir.path(), None, SaveVersion::new(1, 0, 0)).unwrap()
}

#[test]
fn test_list_reports_every_primary() {
    let dir = populated();
    let saves = commands::list(&open(&dir)).unwrap();
    let names: Vec<_> = saves.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(names, vec!["alpha.save", "beta.save"]);
    assert!(saves.iter().all(|s| s.intact));
    assert_eq!(saves[0].backups, 1);
}

#[test]
fn test_verify_all_flags_damaged_save() {
    let dir = populated();
    let orchestrator = open(&dir);
    truncate_file(&orchestrator.resolve("beta").unwrap(), 20).unwrap();

    let reports = commands::verify(&orchestrator, None, VerifyOptions::default()).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].is_valid(), "{:?}", reports[0]);
    assert!(!reports[1].is_valid());
    // Systems of a tool without registered systems are not reported as unknown.
    assert_eq!(reports[0].validation.warning_count(), 0);
}

#[test]
fn test_inspect_missing_save_is_an_error() {
    let dir = populated();
    let err = commands::inspect(&open(&dir), "gamma").unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn test_recover_then_clean() {
    let dir = populated();
    let orchestrator = open(&dir);
    truncate_file(&orchestrator.resolve("alpha").unwrap(), 8).unwrap();
    fs::write(dir.path().join("beta.save.tmp.feedface"), b"x").unwrap();

    let report = commands::recover(&orchestrator).unwrap();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.temp_files_removed.len(), 1);
    assert!(commands::inspect(&orchestrator, "alpha").unwrap().intact);

    let cleaned = commands::clean(&orchestrator, 0).unwrap();
    assert!(cleaned.temp_files_removed.is_empty());
    assert!(cleaned.backups_removed >= 1);
    assert!(commands::backups(&orchestrator, "alpha").unwrap().is_empty());
}

#[test]
fn test_restore_named_backup() {
    let dir = populated();
    let orchestrator = open(&dir);
    let backups = commands::backups(&orchestrator, "alpha").unwrap();
    assert_eq!(backups.len(), 1);

    let result = commands::restore(&orchestrator, "alpha", &backups[0]).unwrap();
    assert!(result.backup_created);
    assert!(commands::restore(&orchestrator, "alpha", "beta.save").is_err());
}

#[test]
fn test_config_file_is_honoured() {
    let dir = populated();
    let config_path = dir.path().join("settings.json");
    fs::write(&config_path, r#"{ "max_backups": 4, "save_dir": "ignored" }"#).unwrap();

    let orchestrator =
        commands::open(dir.path(), Some(&config_path), SaveVersion::new(1, 0, 0)).unwrap();
    assert_eq!(orchestrator.config().max_backups, 4);
    assert_eq!(orchestrator.save_dir(), dir.path().canonicalize().unwrap());
}
