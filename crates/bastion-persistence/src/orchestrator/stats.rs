//! Orchestrator counters and the diagnostic snapshot built from them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::result::{Outcome, SaveOperationResult};
use crate::canonical::CacheStats;
use crate::compression::CompressionStatistics;
use crate::gate::{GateStats, OperationKind};
use crate::recovery::RecoveryStats;

/// Raw counters, guarded by the orchestrator's stats lock.
#[derive(Debug, Clone, Default)]
pub struct SaveStats {
    pub total_saves: u64,
    pub successful_saves: u64,
    pub failed_saves: u64,
    pub incremental_saves: u64,
    pub total_loads: u64,
    pub successful_loads: u64,
    pub failed_loads: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub migrations_performed: u64,
    pub backups_created: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub total_save_time: Duration,
    pub total_load_time: Duration,
    pub errors_by_kind: BTreeMap<&'static str, u64>,
}

impl SaveStats {
    pub(crate) fn record(&mut self, result: &SaveOperationResult, elapsed: Duration) {
        let success = result.outcome == Outcome::Success;
        match result.kind {
            OperationKind::Save => {
                self.total_saves += 1;
                self.total_save_time += elapsed;
                if success {
                    self.successful_saves += 1;
                } else {
                    self.failed_saves += 1;
                }
            }
            OperationKind::Load => {
                self.total_loads += 1;
                self.total_load_time += elapsed;
                if success {
                    self.successful_loads += 1;
                } else {
                    self.failed_loads += 1;
                }
            }
        }
        if result.migration_performed && success {
            self.migrations_performed += 1;
        }
        if result.backup_created {
            self.backups_created += 1;
        }
        self.bytes_written += result.bytes_written;
        self.bytes_read += result.bytes_read;
        if let Some(kind) = result.error_kind {
            if kind == crate::ErrorKind::OperationCancelled {
                self.cancelled += 1;
            }
            *self.errors_by_kind.entry(kind.label()).or_default() += 1;
        }
    }
}

/// Validation cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl ValidationCacheStats {
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

/// Point-in-time view of everything the orchestrator tracks.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub total_saves: u64,
    pub successful_saves: u64,
    pub failed_saves: u64,
    pub incremental_saves: u64,
    pub total_loads: u64,
    pub successful_loads: u64,
    pub failed_loads: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub migrations_performed: u64,
    pub backups_created: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub save_success_rate: f64,
    pub load_success_rate: f64,
    pub average_save_ms: f64,
    pub average_load_ms: f64,
    pub errors_by_kind: BTreeMap<&'static str, u64>,
    pub active_operations: usize,
    pub canonical_cache: CacheStats,
    pub canonical_cache_hit_ratio: f64,
    pub validation_cache: ValidationCacheStats,
    pub validation_cache_hit_ratio: f64,
    pub compression: CompressionStatistics,
    pub concurrency: GateStats,
    pub recovery: RecoveryStats,
}

impl StatisticsSnapshot {
    pub(crate) fn build(
        stats: &SaveStats,
        active_operations: usize,
        canonical_cache: CacheStats,
        validation_cache: ValidationCacheStats,
        compression: CompressionStatistics,
        concurrency: GateStats,
        recovery: RecoveryStats,
    ) -> Self {
        Self {
            total_saves: stats.total_saves,
            successful_saves: stats.successful_saves,
            failed_saves: stats.failed_saves,
            incremental_saves: stats.incremental_saves,
            total_loads: stats.total_loads,
            successful_loads: stats.successful_loads,
            failed_loads: stats.failed_loads,
            cancelled: stats.cancelled,
            timed_out: stats.timed_out,
            migrations_performed: stats.migrations_performed,
            backups_created: stats.backups_created,
            bytes_written: stats.bytes_written,
            bytes_read: stats.bytes_read,
            save_success_rate: ratio(stats.successful_saves, stats.total_saves),
            load_success_rate: ratio(stats.successful_loads, stats.total_loads),
            average_save_ms: average_ms(stats.total_save_time, stats.total_saves),
            average_load_ms: average_ms(stats.total_load_time, stats.total_loads),
            errors_by_kind: stats.errors_by_kind.clone(),
            active_operations,
            canonical_cache_hit_ratio: canonical_cache.hit_ratio(),
            canonical_cache,
            validation_cache_hit_ratio: validation_cache.hit_ratio(),
            validation_cache,
            compression,
            concurrency,
            recovery,
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}
