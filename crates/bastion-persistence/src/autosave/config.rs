//! Incremental save configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Thresholds that decide when dirty state should be flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalSaveConfig {
    /// Whether auto-save triggers are evaluated at all.
    pub enabled: bool,

    /// Trigger once this many systems are dirty.
    pub dirty_system_threshold: usize,

    /// Trigger once a system has been dirty for this long.
    pub dirty_time_threshold_ms: u64,

    /// Trigger once the estimated size of dirty systems reaches this many bytes.
    pub dirty_size_threshold_bytes: u64,

    /// A critical change asks for a save right away.
    pub immediate_save_on_critical: bool,

    /// Track content hashes so identical rewrites do not count as changes.
    pub enable_content_hashing: bool,

    /// Hash sampled windows instead of whole buffers.
    pub fast_hash_mode: bool,

    /// Number of change events kept in memory.
    pub history_capacity: usize,
}

impl Default for IncrementalSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirty_system_threshold: 3,
            dirty_time_threshold_ms: 300_000, // 5 minutes
            dirty_size_threshold_bytes: 1024 * 1024,
            immediate_save_on_critical: true,
            enable_content_hashing: true,
            fast_hash_mode: true,
            history_capacity: 1000,
        }
    }
}

impl IncrementalSaveConfig {
    /// Create a config that never triggers.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            immediate_save_on_critical: false,
            ..Default::default()
        }
    }

    /// Check the thresholds against current dirty state.
    ///
    /// The count check wins over the size check, which wins over the time check.
    pub fn evaluate(
        &self,
        dirty_count: usize,
        dirty_bytes: u64,
        oldest_dirty_ms: Option<u64>,
    ) -> Option<TriggerReason> {
        if !self.enabled || dirty_count == 0 {
            return None;
        }

        if dirty_count >= self.dirty_system_threshold {
            return Some(TriggerReason::DirtySystemCount { count: dirty_count });
        }

        if dirty_bytes >= self.dirty_size_threshold_bytes {
            return Some(TriggerReason::DirtySize { bytes: dirty_bytes });
        }

        match oldest_dirty_ms {
            Some(elapsed_ms) if elapsed_ms >= self.dirty_time_threshold_ms => {
                Some(TriggerReason::DirtyDuration { elapsed_ms })
            }
            _ => None,
        }
    }
}

/// Why a save was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TriggerReason {
    CriticalChange { system: String },
    DirtySystemCount { count: usize },
    DirtySize { bytes: u64 },
    DirtyDuration { elapsed_ms: u64 },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalChange { system } => write!(f, "critical change in '{system}'"),
            Self::DirtySystemCount { count } => write!(f, "{count} systems have unsaved changes"),
            Self::DirtySize { bytes } => write!(f, "{bytes} bytes of unsaved changes"),
            Self::DirtyDuration { elapsed_ms } => {
                write!(f, "changes have been unsaved for {} s", elapsed_ms / 1000)
            }
        }
    }
}
