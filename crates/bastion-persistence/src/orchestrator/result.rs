//! The value every save/load/migrate call returns.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::compression::CompressionAlgorithm;
use crate::error::{ErrorKind, PersistenceError};
use crate::gate::OperationKind;
use crate::validation::ValidationReport;
use crate::version::SaveVersion;

/// Whether the operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

/// What a caller can assume about the file on disk afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskState {
    /// Nothing on disk was modified.
    #[default]
    Unchanged,
    /// The file was fully written and verified.
    Written,
    /// The file is damaged or was not written, but an intact backup exists.
    BackupAvailable,
    /// The file may be damaged and no intact backup is known.
    DataLossRisk,
}

impl DiskState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Written => "written",
            Self::BackupAvailable => "backup available",
            Self::DataLossRisk => "data loss risk",
        }
    }
}

impl fmt::Display for DiskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Full account of one operation. Either everything succeeded and was
/// verified, or `error_kind` names the failure and `disk_state` says what
/// the file looks like now.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOperationResult {
    pub operation_id: String,
    pub kind: OperationKind,
    pub filename: String,
    pub path: Option<PathBuf>,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    pub suggestion: Option<String>,
    pub warnings: Vec<String>,
    pub version_loaded: Option<SaveVersion>,
    pub version_saved: Option<SaveVersion>,
    pub migration_performed: bool,
    pub migration_steps: Vec<String>,
    pub atomic_write_used: bool,
    pub backup_created: bool,
    pub backup_path: Option<PathBuf>,
    pub bytes_written: u64,
    pub bytes_read: u64,
    /// Size of the canonical document before compression.
    pub uncompressed_size: u64,
    pub algorithm: Option<CompressionAlgorithm>,
    /// SHA-256 of the file bytes.
    pub file_digest: Option<String>,
    /// SHA-256 of the canonical document without its checksum key.
    pub content_digest: Option<String>,
    /// Systems written (save) or restored (load).
    pub systems: Vec<String>,
    /// Systems whose stored data was reused by an incremental save.
    pub systems_reused: Vec<String>,
    pub validation: ValidationReport,
    pub disk_state: DiskState,
    pub elapsed_ms: u64,
}

impl SaveOperationResult {
    pub(crate) fn begin(operation_id: String, kind: OperationKind, filename: &str) -> Self {
        Self {
            operation_id,
            kind,
            filename: filename.to_string(),
            path: None,
            outcome: Outcome::Failed,
            error_kind: None,
            message: String::new(),
            suggestion: None,
            warnings: Vec::new(),
            version_loaded: None,
            version_saved: None,
            migration_performed: false,
            migration_steps: Vec::new(),
            atomic_write_used: false,
            backup_created: false,
            backup_path: None,
            bytes_written: 0,
            bytes_read: 0,
            uncompressed_size: 0,
            algorithm: None,
            file_digest: None,
            content_digest: None,
            systems: Vec::new(),
            systems_reused: Vec::new(),
            validation: ValidationReport::new(),
            disk_state: DiskState::Unchanged,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn succeed(&mut self, message: impl Into<String>) {
        self.outcome = Outcome::Success;
        self.error_kind = None;
        self.message = message.into();
    }

    pub(crate) fn fail(&mut self, error: &PersistenceError) {
        self.outcome = Outcome::Failed;
        self.error_kind = Some(error.kind());
        self.message = error.user_message();
        self.suggestion = error.suggestion();
        if let PersistenceError::ValidationFailed { report } = error {
            self.validation = report.clone();
        }
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!(operation_id = %self.operation_id, %warning, "operation warning");
        self.warnings.push(warning);
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// True when the failure left nothing modified on disk.
    pub fn disk_unchanged(&self) -> bool {
        self.disk_state == DiskState::Unchanged
    }
}

impl fmt::Display for SaveOperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_kind {
            None => write!(f, "{} '{}' succeeded: {}", self.kind, self.filename, self.message),
            Some(kind) => write!(
                f,
                "{} '{}' failed ({kind}, disk {}): {}",
                self.kind, self.filename, self.disk_state, self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_records_kind_and_suggestion() {
        let mut result = SaveOperationResult::begin("op".into(), OperationKind::Load, "slot");
        result.fail(&PersistenceError::FileNotFound {
            path: PathBuf::from("slot.save"),
        });
        assert!(!result.is_success());
        assert_eq!(result.error_kind, Some(ErrorKind::FileNotFound));
        assert!(result.suggestion.is_some());
        assert!(result.disk_unchanged());
        assert!(result.to_string().contains("file_not_found"));
    }

    #[test]
    fn test_serializes_to_json() {
        let mut result = SaveOperationResult::begin("op".into(), OperationKind::Save, "slot");
        result.succeed("saved");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["kind"], "save");
        assert_eq!(json["disk_state"], "unchanged");
    }
}
