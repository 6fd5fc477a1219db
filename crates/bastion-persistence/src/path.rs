//! Save filename resolution.
//!
//! User-supplied names are checked lexically first (length, characters,
//! reserved device names, absolute paths, `..` segments) so a hostile name
//! never reaches the filesystem. Only names that pass are joined to the
//! canonical save directory and checked again after canonicalization, which
//! catches symlinks pointing out of the directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::validation::{Severity, ValidationIssue, ValidationReport};

/// Extension appended to every save file.
pub const SAVE_EXTENSION: &str = "save";

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

const INVALID_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Why a filename was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("filename is empty")]
    EmptyFilename,

    #[error("filename is {length} bytes long (maximum {MAX_FILENAME_LEN})")]
    TooLong { length: usize },

    #[error("filename contains invalid character {character:?}")]
    InvalidCharacters { character: char },

    #[error("'{name}' is a reserved device name")]
    ReservedName { name: String },

    #[error("'{name}' is reserved for backups and temp files")]
    GeneratedName { name: String },

    #[error("absolute paths are not allowed")]
    AbsolutePath,

    #[error("'..' path segments are not allowed")]
    PathTraversal,

    #[error("resolved path {resolved} is outside {base}")]
    EscapesBaseDir { resolved: PathBuf, base: PathBuf },

    #[error("could not canonicalize {path}: {reason}")]
    CanonicalizationFailed { path: PathBuf, reason: String },
}

impl PathError {
    /// Errors that indicate an attempt to leave the save directory.
    pub const fn is_traversal(&self) -> bool {
        matches!(
            self,
            Self::AbsolutePath | Self::PathTraversal | Self::EscapesBaseDir { .. }
        )
    }
}

/// Resolves filenames inside one base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    /// The base directory must already exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, PathError> {
        let base = base_dir.as_ref();
        let base_dir = base
            .canonicalize()
            .map_err(|e| PathError::CanonicalizationFailed {
                path: base.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self { base_dir })
    }

    /// Canonical base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map `filename` to a path inside the base directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, PathError> {
        let name = check_filename(filename)?;
        let joined = self.base_dir.join(&name);

        let resolved = if joined.symlink_metadata().is_ok() {
            joined
                .canonicalize()
                .map_err(|e| PathError::CanonicalizationFailed {
                    path: joined.clone(),
                    reason: e.to_string(),
                })?
        } else {
            joined
        };

        if !resolved.starts_with(&self.base_dir) || resolved == self.base_dir {
            return Err(PathError::EscapesBaseDir {
                resolved,
                base: self.base_dir.clone(),
            });
        }
        Ok(resolved)
    }

    /// Diagnostic report for `filename` without touching the filesystem.
    pub fn validate_filename(filename: &str) -> ValidationReport {
        const VALIDATOR: &str = "filename";
        let mut report = ValidationReport::new();

        if let Err(e) = check_filename(filename) {
            let fix = match &e {
                PathError::TooLong { .. } => Some("Use a shorter name.".to_string()),
                PathError::ReservedName { .. } => {
                    Some("Add a prefix such as 'save_' to the name.".to_string())
                }
                PathError::InvalidCharacters { .. } => {
                    Some("Remove characters such as < > : \" | ? * and slashes.".to_string())
                }
                _ => None,
            };
            report.push(ValidationIssue {
                severity: Severity::Error,
                validator: VALIDATOR.to_string(),
                field_path: "filename".to_string(),
                message: e.to_string(),
                suggested_fix: fix,
            });
            return report;
        }

        if filename.starts_with('.') {
            report.push(ValidationIssue::warning(
                VALIDATOR,
                "filename",
                "hidden file names may not show up in file browsers",
            ));
        }
        if !has_save_extension(filename) {
            report.push(ValidationIssue::warning(
                VALIDATOR,
                "filename",
                format!("'.{SAVE_EXTENSION}' will be appended"),
            ));
        }
        report
    }
}

/// Lexical checks; returns the name with the save extension applied.
fn check_filename(filename: &str) -> Result<String, PathError> {
    if filename.is_empty() {
        return Err(PathError::EmptyFilename);
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(PathError::TooLong {
            length: filename.len(),
        });
    }
    if is_absolute(filename) {
        return Err(PathError::AbsolutePath);
    }
    if filename.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(PathError::PathTraversal);
    }
    if let Some(character) = filename
        .chars()
        .find(|c| INVALID_CHARS.contains(c) || c.is_control() || *c == '/' || *c == '\\')
    {
        return Err(PathError::InvalidCharacters { character });
    }
    if filename == "." {
        return Err(PathError::InvalidCharacters { character: '.' });
    }

    let stem = filename.split('.').next().unwrap_or_default();
    if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return Err(PathError::ReservedName {
            name: stem.to_string(),
        });
    }

    let name = if has_save_extension(filename) {
        filename.to_string()
    } else {
        format!("{filename}.{SAVE_EXTENSION}")
    };
    if name.len() > MAX_FILENAME_LEN {
        return Err(PathError::TooLong { length: name.len() });
    }
    Ok(name)
}

fn has_save_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SAVE_EXTENSION))
}

/// Absolute on any platform: leading separator or a drive prefix.
fn is_absolute(filename: &str) -> bool {
    let bytes = filename.as_bytes();
    filename.starts_with(['/', '\\'])
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
        || Path::new(filename).is_absolute()
}
