//! Read-only diagnostics and the validator cache.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stats::ValidationCacheStats;
use super::SaveOrchestrator;
use crate::checksum;
use crate::compression::CompressionAlgorithm;
use crate::error::{ErrorKind, PersistenceError, Result};
use crate::format;
use crate::gate::OperationKind;
use crate::io;
use crate::tree::TreeValue;
use crate::validation::{ValidationContext, ValidationReport};
use crate::version::SaveVersion;

/// What [`SaveOrchestrator::verify_file`] checks.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    /// Add per-stage notes to the report.
    pub verbose: bool,
    pub run_validators: bool,
    pub check_migration: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            run_validators: true,
            check_migration: true,
        }
    }
}

/// Everything learned about one save file without modifying it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub filename: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub file_digest: String,
    pub algorithm: Option<CompressionAlgorithm>,
    pub original_size: Option<u64>,
    pub stored_size: Option<u64>,
    /// Frame header and document envelope parsed.
    pub structure_ok: bool,
    /// Frame CRC matched the stored payload.
    pub frame_checksum_ok: bool,
    /// `None` when the document carries no content checksum.
    pub content_checksum_ok: Option<bool>,
    pub version: Option<SaveVersion>,
    pub saved_at: Option<DateTime<Utc>>,
    pub systems: Vec<String>,
    pub migration_required: bool,
    pub migration_path: Vec<String>,
    pub validation: ValidationReport,
    pub errors: Vec<String>,
    pub notes: Vec<String>,
}

impl VerificationReport {
    /// Structurally sound, checksums intact, validators happy and loadable.
    pub fn is_valid(&self) -> bool {
        self.structure_ok
            && self.frame_checksum_ok
            && self.content_checksum_ok != Some(false)
            && self.validation.is_valid()
            && self.errors.is_empty()
    }
}

/// Validator reports keyed by document digest, bounded FIFO.
pub(crate) struct ValidationCache {
    enabled: bool,
    capacity: usize,
    entries: RwLock<CacheEntries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Default)]
struct CacheEntries {
    reports: HashMap<String, ValidationReport>,
    order: VecDeque<String>,
}

impl ValidationCache {
    pub(crate) fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled: enabled && capacity > 0,
            capacity,
            entries: RwLock::new(CacheEntries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &str) -> Option<ValidationReport> {
        if !self.enabled {
            return None;
        }
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reports
            .get(key)
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn insert(&self, key: String, report: ValidationReport) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.reports.insert(key.clone(), report).is_none() {
            entries.order.push_back(key);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.reports.remove(&oldest);
            }
        }
    }

    pub(crate) fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.reports.clear();
        entries.order.clear();
    }

    pub(crate) fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> ValidationCacheStats {
        ValidationCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .reports
                .len(),
            capacity: self.capacity,
        }
    }
}

impl SaveOrchestrator {
    /// Run every registered validator over `document`, consulting the cache.
    pub(crate) fn validate_document(&self, document: &TreeValue) -> Result<ValidationReport> {
        let key = self
            .canonical
            .digest(document)
            .map_err(|e| PersistenceError::Serialization {
                context: "document for validation".to_string(),
                reason: e.to_string(),
            })?;
        if let Some(report) = self.validation_cache.get(&key) {
            tracing::trace!(digest = %key, "validation cache hit");
            return Ok(report);
        }

        let expected_systems = self.system_names();
        let context = ValidationContext {
            expected_systems: &expected_systems,
            current_version: &self.current_version,
        };
        let mut report = ValidationReport::new();
        for (name, validator) in self.validators_snapshot() {
            report.record_validator(name.as_str());
            report.extend(validator.validate(document, &context));
        }
        tracing::debug!(
            validators = report.validators_run().len(),
            errors = report.error_count(),
            warnings = report.warning_count(),
            "document validated"
        );
        self.validation_cache.insert(key, report.clone());
        Ok(report)
    }

    /// Decode `filename`, migrate it in memory if needed and validate it.
    pub fn validate_save(&self, filename: &str) -> Result<ValidationReport> {
        let path = self.resolve(filename)?;
        let bytes = io::read_file(&path)?;
        let decoded = format::decode_save(&path, &bytes, &self.engine, &self.canonical)?;
        let document = if decoded.version == self.current_version {
            decoded.document
        } else {
            self.migrations
                .migrate_document(&decoded.document, &decoded.version, &self.current_version)?
                .document
        };
        self.validate_document(&document)
    }

    /// `Ok(false)` when the frame CRC or content checksum does not match.
    /// Structural damage is still an error.
    pub fn verify_checksum(&self, filename: &str) -> Result<bool> {
        let path = self.resolve(filename)?;
        let bytes = io::read_file(&path)?;
        match format::decode_save(&path, &bytes, &self.engine, &self.canonical) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::ChecksumMismatch => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Inspect a save stage by stage without changing anything on disk.
    ///
    /// Only path and read failures are errors; everything found in the file
    /// is reported.
    pub fn verify_file(&self, filename: &str, options: VerifyOptions) -> Result<VerificationReport> {
        let path = self.resolve(filename)?;
        let _slot = self.gate.acquire(OperationKind::Load, self.config.slot_timeout())?;
        let bytes = io::read_file(&path)?;

        let mut report = VerificationReport {
            filename: filename.to_string(),
            path: path.clone(),
            file_size: bytes.len() as u64,
            file_digest: checksum::digest(&bytes),
            ..Default::default()
        };

        let header = match format::read_frame_header(&path, &bytes) {
            Ok(header) => header,
            Err(e) => {
                report.errors.push(e.to_string());
                return Ok(report);
            }
        };
        report.algorithm = Some(header.algorithm);
        report.original_size = Some(header.original_size);
        report.stored_size = Some(header.compressed_size);
        if options.verbose {
            report.notes.push(format!(
                "frame v{}: {} {} -> {} bytes, crc {:08x}",
                header.format_version,
                header.algorithm,
                header.original_size,
                header.compressed_size,
                header.checksum
            ));
        }

        let frame = match format::parse_frame(&path, &bytes) {
            Ok(frame) => frame,
            Err(e) => {
                report.errors.push(e.to_string());
                return Ok(report);
            }
        };
        if let Err(e) = frame.verify_checksum() {
            report.errors.push(format::frame_error(&path, e).to_string());
            return Ok(report);
        }
        report.frame_checksum_ok = true;

        let document = match format::decompress_frame(&self.engine, &path, &frame)
            .and_then(|raw| format::parse_document(&path, &raw))
        {
            Ok(document) => document,
            Err(e) => {
                report.errors.push(e.to_string());
                return Ok(report);
            }
        };
        report.structure_ok = true;
        report.systems = format::document_systems(&document)
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        report.saved_at = format::document_timestamp(&document);

        report.content_checksum_ok =
            match format::verify_content_checksum(&document, &self.canonical, &path) {
                Ok(Some(_)) => Some(true),
                Ok(None) => {
                    report.notes.push("document has no content checksum".to_string());
                    None
                }
                Err(e) => {
                    report.errors.push(e.to_string());
                    Some(false)
                }
            };

        match format::document_version(&path, &document) {
            Ok(version) => {
                if options.check_migration && version != self.current_version {
                    report.migration_required = true;
                    match self.migrations.preview(&version, &self.current_version) {
                        Ok(steps) => report.migration_path = steps,
                        Err(e) => report.errors.push(e.to_string()),
                    }
                }
                report.version = Some(version);
            }
            Err(e) => report.errors.push(e.to_string()),
        }

        if options.run_validators {
            report.validation = self.validate_document(&document)?;
            if options.verbose {
                report.notes.push(format!(
                    "validators run: {}",
                    report.validation.validators_run().join(", ")
                ));
                for issue in report.validation.issues() {
                    report.notes.push(format!(
                        "[{}] {} {}: {}",
                        issue.severity.label(),
                        issue.validator,
                        issue.field_path,
                        issue.message
                    ));
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            valid = report.is_valid(),
            errors = report.errors.len(),
            "save verified"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::tree::TreeValue;
    use tempfile::tempdir;

    #[test]
    fn test_verify_intact_file() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.register_system(MemorySystem::new("realm", TreeValue::object().with("a", 1)));
        orchestrator.save_game("slot1");

        let report = orchestrator
            .verify_file("slot1", VerifyOptions { verbose: true, ..Default::default() })
            .unwrap();
        assert!(report.is_valid(), "{report:?}");
        assert_eq!(report.systems, vec!["realm"]);
        assert_eq!(report.version, Some(SaveVersion::new(1, 2, 0)));
        assert!(!report.notes.is_empty());
        assert!(orchestrator.verify_checksum("slot1").unwrap());
    }

    #[test]
    fn test_verify_reports_flipped_byte() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.register_system(MemorySystem::new("realm", TreeValue::object()));
        let path = orchestrator.save_game("slot1").path.unwrap();
        crate::chaos::corrupt_file_byte(&path, crate::compression::HEADER_LEN).unwrap();

        let report = orchestrator.verify_file("slot1", VerifyOptions::default()).unwrap();
        assert!(!report.is_valid());
        assert!(!report.frame_checksum_ok);
        assert_eq!(report.errors.len(), 1);
        assert!(!orchestrator.verify_checksum("slot1").unwrap());
    }

    #[test]
    fn test_validation_cache_hits_on_repeat() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.register_system(MemorySystem::new("realm", TreeValue::object()));
        orchestrator.save_game("slot1");

        orchestrator.validate_save("slot1").unwrap();
        orchestrator.validate_save("slot1").unwrap();
        let stats = orchestrator.statistics().validation_cache;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);

        orchestrator.register_system(MemorySystem::new("economy", TreeValue::object()));
        assert_eq!(orchestrator.statistics().validation_cache.entries, 0);
        let report = orchestrator.validate_save("slot1").unwrap();
        assert!(report.is_valid());
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = ValidationCache::new(true, 2);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), ValidationReport::new());
        }
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().entries, 2);

        let disabled = ValidationCache::new(false, 2);
        disabled.insert("a".to_string(), ValidationReport::new());
        assert!(disabled.get("a").is_none());
        assert_eq!(disabled.stats().misses, 0);
    }
}
