//! Load pipeline and save migration.

use std::path::Path;

use super::operations::{OperationHandle, OperationStage};
use super::result::{DiskState, SaveOperationResult};
use super::SaveOrchestrator;
use crate::checksum;
use crate::error::{ErrorKind, PersistenceError, Result};
use crate::format::{self, DecodedSave};
use crate::gate::OperationKind;
use crate::io;
use crate::tree::TreeValue;
use crate::version::SaveVersion;

impl SaveOrchestrator {
    /// Read `filename`, migrate it to the current version if needed,
    /// validate it and hand each registered system its data.
    pub fn load_game(&self, filename: &str) -> SaveOperationResult {
        self.execute(OperationKind::Load, filename, |op, result| {
            self.run_load(op, result, filename)
        })
    }

    /// Rewrite `filename` at `target`, keeping a backup of the old file.
    pub fn migrate_save(&self, filename: &str, target: &SaveVersion) -> SaveOperationResult {
        self.execute(OperationKind::Save, filename, |op, result| {
            self.run_migrate(op, result, filename, target)
        })
    }

    /// Whether loading `filename` would run migrations.
    pub fn is_migration_required(&self, filename: &str) -> Result<bool> {
        let path = self.resolve(filename)?;
        let bytes = io::read_file(&path)?;
        let decoded = format::decode_save(&path, &bytes, &self.engine, &self.canonical)?;
        Ok(decoded.version != self.current_version)
    }

    fn run_load(
        &self,
        op: &OperationHandle<'_>,
        result: &mut SaveOperationResult,
        filename: &str,
    ) -> Result<()> {
        op.checkpoint(OperationStage::Resolving)?;
        let path = self.resolve(filename)?;
        result.path = Some(path.clone());

        let _slot = self.gate.acquire(OperationKind::Load, self.config.slot_timeout())?;

        op.checkpoint(OperationStage::Reading)?;
        let decoded = self.read_decoded(&path, result)?;
        result.version_loaded = Some(decoded.version.clone());
        if decoded.content_digest.is_none() {
            result.warn("save has no content checksum; only the frame CRC was verified");
        }

        op.checkpoint(OperationStage::Migrating)?;
        let document = self.migrate_to(decoded, &self.current_version, result)?;

        op.checkpoint(OperationStage::Validating)?;
        let report = self.validate_document(&document)?;
        result.validation = report.clone();
        if !report.is_valid() {
            return Err(PersistenceError::ValidationFailed { report });
        }
        if report.warning_count() > 0 {
            result.warn(format!("{} validation warning(s)", report.warning_count()));
        }

        op.checkpoint(OperationStage::Deserializing)?;
        self.deserialize_systems(&document, result)?;

        result.succeed(format!(
            "loaded {} system(s) from {}",
            result.systems.len(),
            path.display()
        ));
        Ok(())
    }

    fn run_migrate(
        &self,
        op: &OperationHandle<'_>,
        result: &mut SaveOperationResult,
        filename: &str,
        target: &SaveVersion,
    ) -> Result<()> {
        op.checkpoint(OperationStage::Resolving)?;
        let path = self.resolve_primary(filename)?;
        result.path = Some(path.clone());

        let _slot = self.gate.acquire(OperationKind::Save, self.config.slot_timeout())?;

        op.checkpoint(OperationStage::Reading)?;
        let decoded = self.read_decoded(&path, result)?;
        result.version_loaded = Some(decoded.version.clone());
        if decoded.version == *target {
            result.succeed(format!("{} is already at version {target}", path.display()));
            return Ok(());
        }

        op.checkpoint(OperationStage::Migrating)?;
        let document = self.migrate_to(decoded, target, result)?;
        let sealed = format::reseal_document(document, &self.canonical, &path)?;
        self.write_document(op, result, &path, sealed)?;
        result.version_saved = Some(target.clone());
        if result.message.is_empty() {
            result.succeed(format!(
                "migrated {} to version {target} in {} step(s)",
                path.display(),
                result.migration_steps.len()
            ));
        }
        Ok(())
    }

    /// Read and fully decode `path`, recording sizes and digests. Integrity
    /// failures set the disk state according to the available backups.
    fn read_decoded(&self, path: &Path, result: &mut SaveOperationResult) -> Result<DecodedSave> {
        self.inject_read_faults();
        let bytes = io::read_file(path)?;
        result.bytes_read = bytes.len() as u64;
        result.file_digest = Some(checksum::digest(&bytes));

        match format::decode_save(path, &bytes, &self.engine, &self.canonical) {
            Ok(decoded) => {
                result.algorithm = Some(decoded.algorithm);
                result.uncompressed_size = decoded.original_size;
                result.content_digest = decoded.content_digest.clone();
                Ok(decoded)
            }
            Err(e) => {
                if matches!(
                    e.kind(),
                    ErrorKind::CorruptionDetected | ErrorKind::ChecksumMismatch
                ) {
                    result.disk_state = self.damage_state(path);
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        disk_state = %result.disk_state,
                        "save failed integrity checks"
                    );
                }
                Err(e)
            }
        }
    }

    /// `BackupAvailable` when an intact backup of `path` exists.
    fn damage_state(&self, path: &Path) -> DiskState {
        match self.recovery.find_best_backup(path) {
            Ok(_) => DiskState::BackupAvailable,
            Err(_) => DiskState::DataLossRisk,
        }
    }

    /// Bring a decoded document to `target`, recording the steps taken.
    ///
    /// Newer-than-target documents only load when a registered path leads
    /// back down to `target`.
    fn migrate_to(
        &self,
        decoded: DecodedSave,
        target: &SaveVersion,
        result: &mut SaveOperationResult,
    ) -> Result<TreeValue> {
        let from = decoded.version;
        if from == *target {
            return Ok(decoded.document);
        }
        if from > *target && !self.migrations.is_supported(&from, target) {
            return Err(PersistenceError::MigrationFailed {
                from,
                to: target.clone(),
                failed_step: None,
                reason: "the save was written by a newer version".to_string(),
            });
        }

        let outcome = self.migrations.migrate_document(&decoded.document, &from, target)?;
        result.migration_performed = true;
        result.migration_steps = outcome.steps;
        tracing::info!(
            %from,
            to = %target,
            steps = result.migration_steps.len(),
            "save migrated"
        );
        Ok(outcome.document)
    }

    fn deserialize_systems(
        &self,
        document: &TreeValue,
        result: &mut SaveOperationResult,
    ) -> Result<()> {
        let stored = format::document_systems(document);
        for system in self.systems_snapshot() {
            let name = system.name();
            let Some((_, data)) = stored.iter().find(|(n, _)| n == name) else {
                result.warn(format!("no saved data for system '{name}'"));
                continue;
            };
            if !system.deserialize(data, &self.current_version) {
                return Err(PersistenceError::Serialization {
                    context: format!("system '{name}'"),
                    reason: "the system rejected the saved data".to_string(),
                });
            }
            tracing::debug!(system = name, "system restored");
            result.systems.push(name.to_string());
        }
        Ok(())
    }

    fn inject_read_faults(&self) {
        #[cfg(any(test, feature = "chaos"))]
        self.faults.apply_latency();
    }
}
