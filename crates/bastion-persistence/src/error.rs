//! Persistence error types.
//!
//! All persistence operations return structured errors that provide
//! user-friendly messages and optional remediation hints. Every error maps
//! onto a small, stable [`ErrorKind`] so callers can branch on the failure
//! class without matching on every variant.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compression::CompressionError;
use crate::gate::OperationKind;
use crate::migration::FailedStep;
use crate::path::PathError;
use crate::validation::ValidationReport;
use crate::version::SaveVersion;

/// Raw OS error code for "no space left on device" on Unix platforms.
const ENOSPC: i32 = 28;

/// Stable classification of persistence failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidFilename,
    PathTraversal,
    InsufficientSpace,
    PermissionDenied,
    FileNotFound,
    CorruptionDetected,
    SerializationFailed,
    ValidationFailed,
    MigrationFailed,
    ChecksumMismatch,
    ConcurrentLimitExceeded,
    OperationCancelled,
    Unknown,
}

impl ErrorKind {
    /// Machine-readable label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidFilename => "invalid_filename",
            Self::PathTraversal => "path_traversal",
            Self::InsufficientSpace => "insufficient_space",
            Self::PermissionDenied => "permission_denied",
            Self::FileNotFound => "file_not_found",
            Self::CorruptionDetected => "corruption_detected",
            Self::SerializationFailed => "serialization_failed",
            Self::ValidationFailed => "validation_failed",
            Self::MigrationFailed => "migration_failed",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::ConcurrentLimitExceeded => "concurrent_limit_exceeded",
            Self::OperationCancelled => "operation_cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Persistence operation error.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filename rejected before any filesystem access.
    #[error("Invalid save filename '{filename}'")]
    InvalidFilename {
        filename: String,
        #[source]
        source: PathError,
    },

    /// Filename would resolve outside the save directory.
    #[error("Save filename '{filename}' escapes the save directory")]
    PathTraversal {
        filename: String,
        #[source]
        source: PathError,
    },

    /// The device ran out of space while writing.
    #[error("Not enough disk space to write {path}")]
    InsufficientSpace {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    /// Access to the file was refused by the operating system.
    #[error("Permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The save file does not exist.
    #[error("Save file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Structural damage: bad magic, truncated frame, malformed document.
    #[error("Save file is corrupted: {reason}")]
    CorruptionDetected { path: PathBuf, reason: String },

    /// Stored checksum does not match the bytes on disk.
    #[error("Checksum mismatch in {path} (expected {expected}, found {actual})")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A system or the document could not be encoded.
    #[error("Failed to serialize {context}: {reason}")]
    Serialization { context: String, reason: String },

    /// Validators reported blocking issues.
    #[error("Save validation failed with {} blocking issue(s)", .report.blocking_count())]
    ValidationFailed { report: ValidationReport },

    /// No migration path, or a migration step failed.
    #[error("Migration from {from} to {to} failed: {reason}")]
    MigrationFailed {
        from: SaveVersion,
        to: SaveVersion,
        failed_step: Option<FailedStep>,
        reason: String,
    },

    /// No save/load slot became free before the timeout.
    #[error("Too many concurrent {kind} operations (waited {waited_ms} ms)")]
    ConcurrentLimitExceeded { kind: OperationKind, waited_ms: u64 },

    /// Cooperative cancellation or timeout sweep stopped the operation.
    #[error("Operation {operation_id} was cancelled")]
    OperationCancelled { operation_id: String },

    /// Codec failure.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// File I/O error.
    #[error("Failed to {operation} file: {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Atomic write failed (temp file couldn't be renamed).
    #[error("Failed to complete save operation")]
    AtomicWriteFailed {
        temp_path: PathBuf,
        target_path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration value out of range.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A blocking task panicked or was aborted.
    #[error("Background persistence task failed")]
    TaskJoin {
        #[source]
        source: tokio::task::JoinError,
    },
}

impl PersistenceError {
    /// Wrap an I/O error, promoting well-known OS conditions to their own variants.
    pub fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        if is_out_of_space(&source) {
            return Self::InsufficientSpace {
                path,
                source: Some(source),
            };
        }
        match source.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            _ => Self::Io {
                operation,
                path,
                source,
            },
        }
    }

    /// Classify a path resolution failure.
    pub fn from_path_error(filename: &str, source: PathError) -> Self {
        let filename = filename.to_string();
        if source.is_traversal() {
            Self::PathTraversal { filename, source }
        } else {
            Self::InvalidFilename { filename, source }
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFilename { .. } => ErrorKind::InvalidFilename,
            Self::InvalidConfig { .. } => ErrorKind::ValidationFailed,
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::CorruptionDetected { .. } => ErrorKind::CorruptionDetected,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Serialization { .. } => ErrorKind::SerializationFailed,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::MigrationFailed { .. } => ErrorKind::MigrationFailed,
            Self::ConcurrentLimitExceeded { .. } => ErrorKind::ConcurrentLimitExceeded,
            Self::OperationCancelled { .. } => ErrorKind::OperationCancelled,
            Self::Compression(source) => {
                if source.is_data_error() {
                    ErrorKind::CorruptionDetected
                } else {
                    ErrorKind::SerializationFailed
                }
            }
            Self::AtomicWriteFailed { source, .. } => match source.kind() {
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ if is_out_of_space(source) => ErrorKind::InsufficientSpace,
                _ => ErrorKind::Unknown,
            },
            Self::Io { .. } | Self::TaskJoin { .. } => ErrorKind::Unknown,
        }
    }

    /// Get a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidFilename { filename, source } => {
                format!("'{filename}' cannot be used as a save name: {source}.")
            }
            Self::PathTraversal { filename, .. } => {
                format!("'{filename}' points outside the save folder and was refused.")
            }
            Self::InsufficientSpace { path, .. } => {
                format!("There is not enough free disk space to write {}.", path.display())
            }
            Self::PermissionDenied { path, .. } => {
                format!("You do not have permission to access {}.", path.display())
            }
            Self::FileNotFound { path } => {
                format!("The save file {} does not exist.", path.display())
            }
            Self::CorruptionDetected { path, reason } => {
                format!("The save file {} is damaged: {reason}.", path.display())
            }
            Self::ChecksumMismatch { path, .. } => {
                format!(
                    "The save file {} failed its integrity check and was not loaded.",
                    path.display()
                )
            }
            Self::Serialization { context, .. } => {
                format!("An error occurred while encoding {context}.")
            }
            Self::ValidationFailed { report } => {
                format!(
                    "The save data failed validation ({} error(s), {} critical).",
                    report.error_count(),
                    report.critical_count()
                )
            }
            Self::MigrationFailed {
                from,
                to,
                failed_step,
                ..
            } => match failed_step {
                Some(step) => format!(
                    "Upgrading the save from {from} to {to} failed at step {} ({}).",
                    step.index + 1,
                    step.description
                ),
                None => format!("This save cannot be upgraded from {from} to {to}."),
            },
            Self::ConcurrentLimitExceeded { kind, .. } => {
                format!("Too many {kind} operations are already running.")
            }
            Self::OperationCancelled { .. } => "The operation was cancelled.".to_string(),
            Self::Compression(source) => format!("The save data could not be processed: {source}."),
            Self::Io {
                operation, path, ..
            } => {
                format!("Could not {} the file at {}", operation, path.display())
            }
            Self::AtomicWriteFailed { target_path, .. } => {
                format!(
                    "Could not save the file to {}. Please check disk space and permissions.",
                    target_path.display()
                )
            }
            Self::InvalidConfig { field, reason } => {
                format!("The persistence setting '{field}' is invalid: {reason}.")
            }
            Self::TaskJoin { .. } => "A background save task stopped unexpectedly.".to_string(),
        }
    }

    /// Get a suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidFilename { .. } => Some(
                "Use a plain name made of letters, digits, '-' and '_' without folder separators."
                    .into(),
            ),
            Self::PathTraversal { .. } => {
                Some("Choose a name without '..', drive letters or leading slashes.".into())
            }
            Self::InsufficientSpace { .. } => {
                Some("Free up disk space or delete old backups, then save again.".into())
            }
            Self::PermissionDenied { .. } => {
                Some("Check that the save folder is writable by this user.".into())
            }
            Self::FileNotFound { .. } => Some("List the available saves and pick one.".into()),
            Self::CorruptionDetected { .. } | Self::ChecksumMismatch { .. } => {
                Some("Run crash recovery to restore the most recent valid backup.".into())
            }
            Self::Compression(source) if source.is_data_error() => {
                Some("Run crash recovery to restore the most recent valid backup.".into())
            }
            Self::ValidationFailed { .. } => {
                Some("Verify the file to see the individual validation issues.".into())
            }
            Self::MigrationFailed { .. } => Some(
                "Open the save with the application version that created it, or restore a backup."
                    .into(),
            ),
            Self::ConcurrentLimitExceeded { .. } => {
                Some("Wait for running saves or loads to finish and retry.".into())
            }
            Self::AtomicWriteFailed { .. } => {
                Some("Free up disk space or try saving to a different location.".into())
            }
            Self::Io { operation, .. } => {
                if *operation == "read" {
                    Some("Check that the file exists and you have permission to read it.".into())
                } else {
                    Some("Check that you have permission to write to this location.".into())
                }
            }
            Self::InvalidConfig { .. } => Some("Fix the value in the configuration file.".into()),
            Self::OperationCancelled { .. } | Self::Serialization { .. } | Self::Compression(_) => {
                None
            }
            Self::TaskJoin { .. } => None,
        }
    }
}

fn is_out_of_space(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::StorageFull || error.raw_os_error() == Some(ENOSPC)
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_file_not_found() {
        let err = PersistenceError::io(
            "read",
            Path::new("missing.save"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_io_permission_denied() {
        let err = PersistenceError::io(
            "write",
            Path::new("locked.save"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_io_storage_full() {
        let err = PersistenceError::io(
            "write",
            Path::new("big.save"),
            io::Error::from(io::ErrorKind::StorageFull),
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
    }

    #[test]
    fn test_path_error_classification() {
        let err = PersistenceError::from_path_error("../x", PathError::PathTraversal);
        assert_eq!(err.kind(), ErrorKind::PathTraversal);

        let err = PersistenceError::from_path_error("", PathError::EmptyFilename);
        assert_eq!(err.kind(), ErrorKind::InvalidFilename);
    }

    #[test]
    fn test_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::ChecksumMismatch.label(), "checksum_mismatch");
        assert_eq!(
            ErrorKind::ConcurrentLimitExceeded.to_string(),
            "concurrent_limit_exceeded"
        );
    }
}
