//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionConfig;
use crate::error::{PersistenceError, Result};

/// Settings for a [`crate::SaveOrchestrator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory every save filename is resolved against.
    pub save_dir: PathBuf,

    pub max_concurrent_saves: usize,
    pub max_concurrent_loads: usize,

    /// Write through a temp file and rename. Turning this off overwrites in place.
    pub atomic_writes: bool,

    /// Copy the previous file aside before replacing it.
    pub auto_backup: bool,

    /// Backups kept per save.
    pub max_backups: usize,

    /// Operations running longer than this are cancelled by the timeout sweep.
    pub operation_timeout_secs: u64,

    /// How long an operation waits for a free save/load slot.
    pub slot_timeout_ms: u64,

    /// Entries in the canonical encoding cache.
    pub canonical_cache_size: usize,

    /// Cache validator reports by document digest.
    pub validation_caching: bool,

    pub validation_cache_size: usize,

    pub compression: CompressionConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saves"),
            max_concurrent_saves: 2,
            max_concurrent_loads: 4,
            atomic_writes: true,
            auto_backup: true,
            max_backups: 10,
            operation_timeout_secs: 300,
            slot_timeout_ms: 30_000,
            canonical_cache_size: 100,
            validation_caching: true,
            validation_cache_size: 256,
            compression: CompressionConfig::default(),
        }
    }
}

impl PersistenceConfig {
    /// Default settings rooted at `save_dir`.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PersistenceError::io("read", path, e))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| PersistenceError::InvalidConfig {
                field: "file",
                reason: format!("{}: {e}", path.display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &str| {
            Err(PersistenceError::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        };
        if self.save_dir.as_os_str().is_empty() {
            return invalid("save_dir", "must not be empty");
        }
        if self.max_concurrent_saves == 0 {
            return invalid("max_concurrent_saves", "must be at least 1");
        }
        if self.max_concurrent_loads == 0 {
            return invalid("max_concurrent_loads", "must be at least 1");
        }
        if self.operation_timeout_secs == 0 {
            return invalid("operation_timeout_secs", "must be at least 1 second");
        }
        if self.slot_timeout_ms == 0 {
            return invalid("slot_timeout_ms", "must be at least 1 ms");
        }
        if self.canonical_cache_size == 0 {
            return invalid("canonical_cache_size", "must be at least 1");
        }
        if self.validation_caching && self.validation_cache_size == 0 {
            return invalid(
                "validation_cache_size",
                "must be at least 1 when validation caching is on",
            );
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }
}
