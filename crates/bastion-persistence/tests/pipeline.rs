//! End-to-end save/load behaviour through the public API.

mod common;

use bastion_persistence::{
    CompressionAlgorithm, CompressionConfig, DiskState, ErrorKind, PersistenceConfig,
    SaveOrchestrator, SaveVersion, TreeValue, VerifyOptions,
};
use tempfile::tempdir;

use common::{Realm, config, kingdom, orchestrator_at};

#[test]
fn test_save_then_load_restores_every_system() {
    let dir = tempdir().unwrap();
    let orchestrator = orchestrator_at(dir.path(), SaveVersion::new(2, 0, 0));
    let realm = Realm::new("realm", kingdom());
    let army = Realm::new("army", TreeValue::object().with("units", 17));
    orchestrator.register_system(realm.clone());
    orchestrator.register_system(army.clone());

    let saved = orchestrator.save_game("campaign");
    assert!(saved.is_success(), "{saved}");
    assert_eq!(saved.disk_state, DiskState::Written);
    assert!(saved.atomic_write_used);
    assert_eq!(saved.systems, vec!["realm", "army"]);
    assert!(saved.path.as_ref().unwrap().ends_with("campaign.save"));

    let loaded = orchestrator.load_game("campaign");
    assert!(loaded.is_success(), "{loaded}");
    assert!(loaded.disk_unchanged());
    assert_eq!(realm.restored(), Some(kingdom()));
    assert_eq!(army.restored(), Some(TreeValue::object().with("units", 17)));
    assert_eq!(loaded.content_digest, saved.content_digest);
}

#[test]
fn test_every_algorithm_round_trips() {
    for algorithm in CompressionAlgorithm::ALL {
        let dir = tempdir().unwrap();
        let config = PersistenceConfig {
            compression: CompressionConfig {
                algorithm,
                min_size_threshold: 0,
                ..CompressionConfig::default()
            },
            ..config(dir.path())
        };
        let orchestrator = SaveOrchestrator::new(config, SaveVersion::new(1, 0, 0)).unwrap();
        let realm = Realm::new("realm", kingdom());
        orchestrator.register_system(realm.clone());

        let saved = orchestrator.save_game("slot");
        assert!(saved.is_success(), "{algorithm}: {saved}");
        assert!(orchestrator.load_game("slot").is_success(), "{algorithm}");
        assert_eq!(realm.restored(), Some(kingdom()), "{algorithm}");
    }
}

#[test]
fn test_unsafe_filenames_are_rejected_before_touching_disk() {
    let dir = tempdir().unwrap();
    let orchestrator = orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));

    for name in ["../escape", "/etc/passwd", "a/../../b"] {
        let result = orchestrator.save_game(name);
        assert_eq!(result.error_kind, Some(ErrorKind::PathTraversal), "{name}");
        assert_eq!(result.disk_state, DiskState::Unchanged);
    }
    for name in ["", "bad<name", "CON", "nul.save"] {
        let result = orchestrator.save_game(name);
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidFilename), "{name:?}");
    }
    assert!(orchestrator.list_save_files().unwrap().is_empty());
}

#[test]
fn test_migration_chain_applies_in_order() {
    let dir = tempdir().unwrap();
    let old = orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));
    old.register_system(Realm::new("realm", TreeValue::object().with("gold", 10)));
    assert!(old.save_game("legacy").is_success());

    let current = orchestrator_at(dir.path(), SaveVersion::new(1, 2, 0));
    let realm = Realm::new("realm", TreeValue::object());
    current.register_system(realm.clone());
    current
        .migrations()
        .register(
            SaveVersion::new(1, 1, 0),
            SaveVersion::new(1, 2, 0),
            "double the treasury",
            |doc: &mut TreeValue| {
                let realm = doc
                    .get_mut("systems")
                    .and_then(|s| s.get_mut("realm"))
                    .ok_or("missing realm")?;
                let treasury = realm
                    .get("treasury")
                    .and_then(TreeValue::as_i64)
                    .ok_or("missing treasury")?;
                realm.insert("treasury", treasury * 2);
                Ok(())
            },
        )
        .unwrap();
    current
        .migrations()
        .register(
            SaveVersion::new(1, 0, 0),
            SaveVersion::new(1, 1, 0),
            "rename gold",
            |doc: &mut TreeValue| {
                let realm = doc
                    .get_mut("systems")
                    .and_then(|s| s.get_mut("realm"))
                    .ok_or("missing realm")?;
                let gold = realm.remove("gold").ok_or("missing gold")?;
                realm.insert("treasury", gold);
                Ok(())
            },
        )
        .unwrap();

    assert!(current.is_migration_required("legacy").unwrap());
    let loaded = current.load_game("legacy");
    assert!(loaded.is_success(), "{loaded}");
    assert!(loaded.migration_performed);
    assert_eq!(loaded.migration_steps.len(), 2);
    assert_eq!(loaded.version_loaded, Some(SaveVersion::new(1, 0, 0)));
    assert_eq!(realm.restored(), Some(TreeValue::object().with("treasury", 20)));
}

#[test]
fn test_missing_migration_path_fails_load() {
    let dir = tempdir().unwrap();
    let old = orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));
    old.register_system(Realm::new("realm", kingdom()));
    old.save_game("legacy");

    let current = orchestrator_at(dir.path(), SaveVersion::new(3, 0, 0));
    let realm = Realm::new("realm", TreeValue::object());
    current.register_system(realm.clone());

    let loaded = current.load_game("legacy");
    assert_eq!(loaded.error_kind, Some(ErrorKind::MigrationFailed));
    assert!(loaded.disk_unchanged());
    assert!(realm.restored().is_none());
}

#[test]
fn test_verify_file_reports_clean_save() {
    let dir = tempdir().unwrap();
    let orchestrator = orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));
    orchestrator.register_system(Realm::new("realm", kingdom()));
    orchestrator.save_game("slot");

    let report = orchestrator
        .verify_file(
            "slot",
            VerifyOptions {
                verbose: true,
                ..VerifyOptions::default()
            },
        )
        .unwrap();
    assert!(report.is_valid(), "{report:?}");
    assert_eq!(report.content_checksum_ok, Some(true));
    assert_eq!(report.systems, vec!["realm"]);
    assert!(!report.migration_required);
    assert!(!report.notes.is_empty());
    assert!(orchestrator.verify_checksum("slot").unwrap());
}

#[test]
fn test_statistics_track_outcomes() {
    let dir = tempdir().unwrap();
    let orchestrator = orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));
    orchestrator.register_system(Realm::new("realm", kingdom()));

    orchestrator.save_game("slot");
    orchestrator.save_game("slot");
    orchestrator.load_game("slot");
    orchestrator.load_game("absent");

    let stats = orchestrator.statistics();
    assert_eq!(stats.total_saves, 2);
    assert_eq!(stats.successful_saves, 2);
    assert_eq!(stats.total_loads, 2);
    assert_eq!(stats.failed_loads, 1);
    assert_eq!(stats.errors_by_kind.get("file_not_found"), Some(&1));
    assert_eq!(stats.backups_created, 1);
    assert_eq!(orchestrator.recent_operations(10).len(), 4);

    orchestrator.reset_statistics();
    assert_eq!(orchestrator.statistics().total_saves, 0);
}
