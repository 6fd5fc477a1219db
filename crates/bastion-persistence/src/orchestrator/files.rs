//! Save directory management: listing, info, deletion, backups, crash recovery.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::operations::OperationStage;
use super::result::{DiskState, SaveOperationResult};
use super::SaveOrchestrator;
use crate::compression::CompressionAlgorithm;
use crate::error::{PersistenceError, Result};
use crate::format;
use crate::gate::OperationKind;
use crate::io;
use crate::recovery::RecoveryReport;
use crate::version::SaveVersion;

/// Summary of one save file.
#[derive(Debug, Clone, Serialize)]
pub struct SaveFileInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// `header.timestamp` of the document.
    pub saved_at: Option<DateTime<Utc>>,
    pub version: Option<SaveVersion>,
    pub algorithm: Option<CompressionAlgorithm>,
    pub original_size: Option<u64>,
    pub systems: Vec<String>,
    pub backups: usize,
    /// Whether the file decoded and passed both checksums.
    pub intact: bool,
}

impl SaveOrchestrator {
    /// Primary save filenames in the save directory, sorted.
    pub fn list_save_files(&self) -> Result<Vec<String>> {
        let dir = self.save_dir();
        let entries = fs::read_dir(dir).map_err(|e| PersistenceError::io("list", dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| io::is_primary_save_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// False for missing files and for names that fail resolution.
    pub fn save_file_exists(&self, filename: &str) -> bool {
        self.resolve(filename).is_ok_and(|path| path.is_file())
    }

    /// Delete a primary save. Its backups are kept.
    pub fn delete_save_file(&self, filename: &str) -> Result<()> {
        let path = self.resolve(filename)?;
        let _slot = self.gate.acquire(OperationKind::Save, self.config.slot_timeout())?;
        fs::remove_file(&path).map_err(|e| PersistenceError::io("delete", &path, e))?;
        tracing::info!(path = %path.display(), "save deleted");
        Ok(())
    }

    pub fn save_file_info(&self, filename: &str) -> Result<SaveFileInfo> {
        let path = self.resolve(filename)?;
        let metadata = fs::metadata(&path).map_err(|e| PersistenceError::io("stat", &path, e))?;
        let bytes = io::read_file(&path)?;

        let mut info = SaveFileInfo {
            filename: filename.to_string(),
            path: path.clone(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            saved_at: None,
            version: None,
            algorithm: None,
            original_size: None,
            systems: Vec::new(),
            backups: io::list_backups(&path)?.len(),
            intact: false,
        };

        if let Ok(header) = format::read_frame_header(&path, &bytes) {
            info.algorithm = Some(header.algorithm);
            info.original_size = Some(header.original_size);
        }
        match format::decode_save(&path, &bytes, &self.engine, &self.canonical) {
            Ok(decoded) => {
                info.saved_at = format::document_timestamp(&decoded.document);
                info.systems = format::document_systems(&decoded.document)
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect();
                info.version = Some(decoded.version);
                info.intact = true;
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "save info from damaged file");
            }
        }
        Ok(info)
    }

    /// Copy the current save to a new timestamped backup, then rotate.
    pub fn create_backup(&self, filename: &str) -> Result<PathBuf> {
        let path = self.resolve(filename)?;
        let backup = io::create_backup(&path)?;
        self.recovery
            .cleanup_old_backups(&path, self.config.max_backups)?;
        Ok(backup)
    }

    /// Backups of `filename`, newest first.
    pub fn list_backups(&self, filename: &str) -> Result<Vec<PathBuf>> {
        let path = self.resolve(filename)?;
        io::list_backups(&path)
    }

    /// Replace `filename` with one of its backups. The backup must decode
    /// cleanly; the file being replaced is backed up first.
    pub fn restore_backup(&self, filename: &str, backup_name: &str) -> SaveOperationResult {
        self.execute(OperationKind::Save, filename, |op, result| {
            op.checkpoint(OperationStage::Resolving)?;
            let path = self.resolve_primary(filename)?;
            let backup = self.resolve(backup_name)?;
            result.path = Some(path.clone());
            if !io::list_backups(&path)?.contains(&backup) {
                return Err(PersistenceError::FileNotFound { path: backup });
            }

            let _slot = self.gate.acquire(OperationKind::Save, self.config.slot_timeout())?;

            op.checkpoint(OperationStage::Reading)?;
            let decoded = self.recovery.validate_save_integrity(&backup)?;
            result.version_loaded = Some(decoded.version);

            op.checkpoint(OperationStage::Writing)?;
            if path.is_file() {
                let previous = io::create_backup(&path)?;
                result.backup_created = true;
                result.backup_path = Some(previous);
            }
            io::copy_atomic(&backup, &path)?;
            result.atomic_write_used = true;
            result.disk_state = DiskState::Written;
            result.bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or_default();

            result.succeed(format!(
                "restored {} from {}",
                path.display(),
                backup.display()
            ));
            Ok(())
        })
    }

    /// Remove leftover temp files, repair corrupted saves from backups and
    /// trim backups to the configured count.
    ///
    /// While saves are running, only temp files older than the operation
    /// timeout are treated as abandoned.
    pub fn recover_from_crash(&self) -> Result<RecoveryReport> {
        let temp_min_age = if self.operations.active_count(Some(OperationKind::Save)) == 0 {
            Duration::ZERO
        } else {
            self.config.operation_timeout()
        };
        self.recovery
            .recover_all_with_temp_age(self.config.max_backups, temp_min_age)
    }
}
