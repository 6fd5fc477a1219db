//! Command implementations, independent of how results are printed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bastion_persistence::orchestrator::SaveFileInfo;
use bastion_persistence::validation::SYSTEMS_VALIDATOR;
use bastion_persistence::{
    PersistenceConfig, RecoveryReport, SaveOperationResult, SaveOrchestrator, SaveVersion,
    VerificationReport, VerifyOptions,
};
use serde::Serialize;

/// Open the save directory with an optional JSON config.
///
/// The tool registers no systems, so the registered-systems validator
/// would flag every stored system; it is removed.
pub fn open(save_dir: &Path, config: Option<&Path>, version: SaveVersion) -> Result<SaveOrchestrator> {
    let mut settings = match config {
        Some(path) => PersistenceConfig::from_json_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => PersistenceConfig::default(),
    };
    settings.save_dir = save_dir.to_path_buf();
    let orchestrator = SaveOrchestrator::new(settings, version)
        .with_context(|| format!("failed to open save directory {}", save_dir.display()))?;
    orchestrator.unregister_validator(SYSTEMS_VALIDATOR);
    Ok(orchestrator)
}

/// Details of every primary save, sorted by name.
pub fn list(orchestrator: &SaveOrchestrator) -> Result<Vec<SaveFileInfo>> {
    orchestrator
        .list_save_files()?
        .iter()
        .map(|name| {
            orchestrator
                .save_file_info(name)
                .with_context(|| format!("failed to inspect {name}"))
        })
        .collect()
}

pub fn inspect(orchestrator: &SaveOrchestrator, file: &str) -> Result<SaveFileInfo> {
    if !orchestrator.save_file_exists(file) {
        bail!("save '{file}' does not exist in {}", orchestrator.save_dir().display());
    }
    Ok(orchestrator.save_file_info(file)?)
}

/// Verify one save, or every save when `file` is `None`.
pub fn verify(
    orchestrator: &SaveOrchestrator,
    file: Option<&str>,
    options: VerifyOptions,
) -> Result<Vec<VerificationReport>> {
    let files = match file {
        Some(file) => vec![file.to_string()],
        None => orchestrator.list_save_files()?,
    };
    files
        .iter()
        .map(|name| {
            orchestrator
                .verify_file(name, options)
                .with_context(|| format!("failed to verify {name}"))
        })
        .collect()
}

pub fn recover(orchestrator: &SaveOrchestrator) -> Result<RecoveryReport> {
    Ok(orchestrator.recover_from_crash()?)
}

/// What `clean` removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanSummary {
    pub temp_files_removed: Vec<PathBuf>,
    pub backups_removed: usize,
    pub keep: usize,
}

pub fn clean(orchestrator: &SaveOrchestrator, keep: usize) -> Result<CleanSummary> {
    let recovery = orchestrator.recovery();
    let temp_files_removed = recovery.cleanup_temp_files()?;
    let backups_removed = recovery.cleanup_all_backups(keep)?;
    tracing::info!(
        temp_files = temp_files_removed.len(),
        backups_removed,
        keep,
        "save directory cleaned"
    );
    Ok(CleanSummary {
        temp_files_removed,
        backups_removed,
        keep,
    })
}

/// Backup file names of `file`, newest first.
pub fn backups(orchestrator: &SaveOrchestrator, file: &str) -> Result<Vec<String>> {
    Ok(orchestrator
        .list_backups(file)?
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

pub fn restore(orchestrator: &SaveOrchestrator, file: &str, backup: &str) -> Result<SaveOperationResult> {
    let result = orchestrator.restore_backup(file, backup);
    if !result.is_success() {
        bail!("{}", result.message);
    }
    Ok(result)
}
