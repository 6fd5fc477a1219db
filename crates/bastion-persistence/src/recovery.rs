//! Crash recovery for a save directory.
//!
//! Three kinds of artifacts are recognized:
//!
//! - **incomplete operations**: temp files left behind by an interrupted
//!   atomic write (`*.tmp.*`, `*.tmp`, `*.partial`, `*.writing`)
//! - **corrupted saves**: primary `.save` files that fail frame, CRC,
//!   decompression, parse or content checksum checks
//! - **recoverable backups**: `<stem>_backup_<timestamp>.save` files that
//!   pass the same checks on their own
//!
//! Every cleanup is idempotent. A missing file is never an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::canonical::CanonicalSerializer;
use crate::compression::CompressionEngine;
use crate::error::{PersistenceError, Result};
use crate::format::{DecodedSave, decode_save};
use crate::io;

/// Recovery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub corrupted_found: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub temp_files_cleaned: u64,
    pub backups_cleaned: u64,
}

impl RecoveryStats {
    pub fn success_rate(&self) -> f64 {
        if self.corrupted_found == 0 {
            0.0
        } else {
            self.successful_recoveries as f64 / self.corrupted_found as f64
        }
    }
}

/// A primary that was replaced by one of its backups.
#[derive(Debug, Clone, Serialize)]
pub struct RestoredSave {
    pub path: PathBuf,
    pub backup: PathBuf,
    /// Where the damaged file was copied before being replaced.
    pub set_aside: Option<PathBuf>,
}

/// A primary that could not be repaired.
#[derive(Debug, Clone, Serialize)]
pub struct UnrecoverableSave {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a full directory pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub temp_files_removed: Vec<PathBuf>,
    pub corrupted: Vec<PathBuf>,
    pub restored: Vec<RestoredSave>,
    pub unrecoverable: Vec<UnrecoverableSave>,
    pub backups_removed: usize,
}

impl RecoveryReport {
    /// True when nothing needed attention.
    pub fn is_clean(&self) -> bool {
        self.temp_files_removed.is_empty() && self.corrupted.is_empty()
    }
}

/// Scans and repairs one save directory.
pub struct CrashRecoveryManager {
    dir: PathBuf,
    engine: Arc<CompressionEngine>,
    canonical: CanonicalSerializer,
    stats: Mutex<RecoveryStats>,
}

impl CrashRecoveryManager {
    pub fn new(dir: impl Into<PathBuf>, engine: Arc<CompressionEngine>) -> Self {
        let dir = dir.into();
        tracing::debug!(dir = %dir.display(), "crash recovery manager initialized");
        Self {
            dir,
            engine,
            // each file is decoded once per scan
            canonical: CanonicalSerializer::new(0),
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.dir
    }

    /// Temp files from writes that never completed.
    pub fn find_incomplete_operations(&self) -> Result<Vec<PathBuf>> {
        self.scan(io::is_temp_name)
    }

    /// Primary saves that fail integrity checks.
    pub fn find_corrupted_saves(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .scan(io::is_primary_save_name)?
            .into_iter()
            .filter(|path| self.is_corrupted(path))
            .collect())
    }

    /// Backups that pass integrity checks, newest first.
    pub fn find_recoverable_backups(&self) -> Result<Vec<PathBuf>> {
        let mut backups: Vec<PathBuf> = self
            .scan(|name| {
                io::is_backup_name(name)
                    && name.ends_with(".save")
                    && !io::is_temp_name(name)
            })?
            .into_iter()
            .filter(|path| !self.is_corrupted(path))
            .collect();
        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    /// Decode `path` fully, surfacing the first integrity failure.
    pub fn validate_save_integrity(&self, path: &Path) -> Result<DecodedSave> {
        let bytes = io::read_file(path)?;
        decode_save(path, &bytes, &self.engine, &self.canonical)
    }

    pub fn is_corrupted(&self, path: &Path) -> bool {
        match self.validate_save_integrity(path) {
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "integrity check failed");
                true
            }
        }
    }

    /// Newest backup of `primary` that validates on its own.
    pub fn find_best_backup(&self, primary: &Path) -> Result<PathBuf> {
        io::list_backups(primary)?
            .into_iter()
            .find(|backup| !self.is_corrupted(backup))
            .ok_or_else(|| PersistenceError::CorruptionDetected {
                path: primary.to_path_buf(),
                reason: "no intact backup is available".to_string(),
            })
    }

    /// Replace `primary` with its best backup. The damaged file is copied
    /// aside first. Returns what was restored.
    pub fn attempt_recovery(&self, primary: &Path) -> Result<RestoredSave> {
        tracing::info!(path = %primary.display(), "attempting recovery");
        let result = self.restore_from_best_backup(primary);
        let mut stats = self.lock_stats();
        match &result {
            Ok(restored) => {
                stats.successful_recoveries += 1;
                tracing::info!(
                    path = %primary.display(),
                    backup = %restored.backup.display(),
                    "recovered save from backup"
                );
            }
            Err(e) => {
                stats.failed_recoveries += 1;
                tracing::error!(path = %primary.display(), error = %e, "recovery failed");
            }
        }
        result
    }

    fn restore_from_best_backup(&self, primary: &Path) -> Result<RestoredSave> {
        let backup = self.find_best_backup(primary)?;

        let set_aside = if primary.exists() {
            let aside = io::corrupted_path_for(primary);
            io::copy_atomic(primary, &aside)?;
            Some(aside)
        } else {
            None
        };

        io::copy_atomic(&backup, primary)?;
        Ok(RestoredSave {
            path: primary.to_path_buf(),
            backup,
            set_aside,
        })
    }

    /// Remove every leftover temp file.
    pub fn cleanup_temp_files(&self) -> Result<Vec<PathBuf>> {
        self.cleanup_temp_files_older_than(Duration::ZERO)
    }

    /// Remove leftover temp files not modified within `min_age`, so writes
    /// still in flight keep their staging files.
    pub fn cleanup_temp_files_older_than(&self, min_age: Duration) -> Result<Vec<PathBuf>> {
        let now = SystemTime::now();
        let mut removed = Vec::new();
        for path in self.find_incomplete_operations()? {
            if !min_age.is_zero() {
                let age = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok());
                if age.is_none_or(|age| age < min_age) {
                    continue;
                }
            }
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PersistenceError::io("remove", &path, e)),
            }
        }
        if !removed.is_empty() {
            self.lock_stats().temp_files_cleaned += removed.len() as u64;
            tracing::info!(count = removed.len(), "removed leftover temp files");
        }
        Ok(removed)
    }

    /// Keep the newest `keep` backups of `primary`.
    pub fn cleanup_old_backups(&self, primary: &Path, keep: usize) -> Result<usize> {
        let removed = io::rotate_backups(primary, keep)?;
        if removed > 0 {
            self.lock_stats().backups_cleaned += removed as u64;
        }
        Ok(removed)
    }

    /// Apply [`Self::cleanup_old_backups`] to every primary that has backups.
    pub fn cleanup_all_backups(&self, keep: usize) -> Result<usize> {
        let mut primaries: Vec<String> = self
            .scan(|name| io::is_backup_name(name) && !io::is_temp_name(name))?
            .iter()
            .filter_map(|p| p.file_name())
            .filter_map(|n| io::primary_stem_of_backup(&n.to_string_lossy()).map(str::to_string))
            .collect();
        primaries.sort();
        primaries.dedup();

        let mut removed = 0;
        for stem in primaries {
            removed += self.cleanup_old_backups(&self.dir.join(format!("{stem}.save")), keep)?;
        }
        Ok(removed)
    }

    /// Remove temp files, repair every corrupted primary that has an intact
    /// backup, then trim backups to `keep`.
    pub fn recover_all(&self, keep: usize) -> Result<RecoveryReport> {
        self.recover_all_with_temp_age(keep, Duration::ZERO)
    }

    pub(crate) fn recover_all_with_temp_age(
        &self,
        keep: usize,
        temp_min_age: Duration,
    ) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            temp_files_removed: self.cleanup_temp_files_older_than(temp_min_age)?,
            ..Default::default()
        };

        report.corrupted = self.find_corrupted_saves()?;
        self.lock_stats().corrupted_found += report.corrupted.len() as u64;

        for primary in &report.corrupted {
            match self.attempt_recovery(primary) {
                Ok(restored) => report.restored.push(restored),
                Err(e) => report.unrecoverable.push(UnrecoverableSave {
                    path: primary.clone(),
                    reason: e.user_message(),
                }),
            }
        }

        report.backups_removed = self.cleanup_all_backups(keep)?;
        tracing::info!(
            temp_removed = report.temp_files_removed.len(),
            corrupted = report.corrupted.len(),
            restored = report.restored.len(),
            unrecoverable = report.unrecoverable.len(),
            backups_removed = report.backups_removed,
            "recovery pass complete"
        );
        Ok(report)
    }

    pub fn statistics(&self) -> RecoveryStats {
        *self.lock_stats()
    }

    pub fn reset_statistics(&self) {
        *self.lock_stats() = RecoveryStats::default();
    }

    fn scan<F>(&self, keep: F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&str) -> bool,
    {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io("list", &self.dir, e)),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter(|entry| keep(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RecoveryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
