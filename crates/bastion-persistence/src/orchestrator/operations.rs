//! Active-operation table, cooperative cancellation and the completion log.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::result::{Outcome, SaveOperationResult};
use super::stats::SaveStats;
use crate::error::{ErrorKind, PersistenceError, Result};
use crate::gate::OperationKind;
use crate::locks::OrderedLocks;

/// Completed operations kept for [`crate::SaveOrchestrator::recent_operations`].
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Where an operation currently is. Checked for cancellation at each change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStage {
    Queued,
    Resolving,
    Serializing,
    Compressing,
    Writing,
    Finalizing,
    Reading,
    Decoding,
    Migrating,
    Validating,
    Deserializing,
}

impl OperationStage {
    /// Rough completion percentage reported while in this stage.
    const fn percent(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Resolving => 5,
            Self::Serializing | Self::Reading => 20,
            Self::Compressing | Self::Decoding => 50,
            Self::Migrating => 60,
            Self::Writing | Self::Validating => 70,
            Self::Deserializing => 85,
            Self::Finalizing => 95,
        }
    }
}

impl fmt::Display for OperationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Resolving => "resolving",
            Self::Serializing => "serializing",
            Self::Compressing => "compressing",
            Self::Writing => "writing",
            Self::Finalizing => "finalizing",
            Self::Reading => "reading",
            Self::Decoding => "decoding",
            Self::Migrating => "migrating",
            Self::Validating => "validating",
            Self::Deserializing => "deserializing",
        };
        f.write_str(label)
    }
}

/// Shared between the executing thread and whoever cancels it.
#[derive(Debug)]
pub struct OperationProgress {
    cancelled: AtomicBool,
    percent: AtomicU8,
    stage: Mutex<OperationStage>,
}

impl OperationProgress {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            percent: AtomicU8::new(0),
            stage: Mutex::new(OperationStage::Queued),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    pub fn stage(&self) -> OperationStage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, stage: OperationStage) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = stage;
        self.percent.store(stage.percent(), Ordering::Relaxed);
    }
}

/// One in-flight operation.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub id: String,
    pub filename: String,
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub deadline: Instant,
    pub progress: Arc<OperationProgress>,
}

/// Serializable view of an [`ActiveOperation`].
#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperationInfo {
    pub id: String,
    pub filename: String,
    pub kind: OperationKind,
    pub stage: OperationStage,
    pub percent: u8,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

impl From<&ActiveOperation> for ActiveOperationInfo {
    fn from(op: &ActiveOperation) -> Self {
        Self {
            id: op.id.clone(),
            filename: op.filename.clone(),
            kind: op.kind,
            stage: op.progress.stage(),
            percent: op.progress.percent(),
            started_at: op.started_at,
            elapsed_ms: millis(op.started.elapsed()),
            cancelled: op.progress.is_cancelled(),
        }
    }
}

/// Log entry for a finished operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationEvent {
    pub operation_id: String,
    pub kind: OperationKind,
    pub filename: String,
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

type OperationLocks =
    OrderedLocks<HashMap<String, ActiveOperation>, SaveStats, VecDeque<OperationEvent>>;

/// Active operations, their statistics and the completion log, locked in
/// that order.
#[derive(Default)]
pub(crate) struct OperationTable {
    locks: OperationLocks,
}

impl OperationTable {
    pub(crate) fn begin(
        &self,
        kind: OperationKind,
        filename: &str,
        timeout: Duration,
    ) -> OperationHandle<'_> {
        let id = format!("{kind}-{}", Uuid::new_v4().simple());
        let started = Instant::now();
        let progress = Arc::new(OperationProgress::new());
        let op = ActiveOperation {
            id: id.clone(),
            filename: filename.to_string(),
            kind,
            started_at: Utc::now(),
            started,
            deadline: started + timeout,
            progress: Arc::clone(&progress),
        };
        self.locks.write_state().insert(id.clone(), op);
        tracing::debug!(operation_id = %id, %kind, filename, "operation started");
        OperationHandle {
            table: self,
            id,
            progress,
            started,
            finished: false,
        }
    }

    fn finish(&self, id: &str, result: &SaveOperationResult, elapsed: Duration) {
        let mut active = self.locks.write_state();
        active.remove(id);
        let mut stats = active.write_stats();
        stats.record(result, elapsed);
        let mut events = stats.write_events();
        if events.len() >= EVENT_LOG_CAPACITY {
            events.pop_front();
        }
        events.push_back(OperationEvent {
            operation_id: id.to_string(),
            kind: result.kind,
            filename: result.filename.clone(),
            outcome: result.outcome,
            error_kind: result.error_kind,
            bytes: result.bytes_written.max(result.bytes_read),
            elapsed_ms: millis(elapsed),
            finished_at: Utc::now(),
        });
    }

    fn abandon(&self, id: &str) {
        self.locks.write_state().remove(id);
    }

    pub(crate) fn cancel(&self, id: &str) -> bool {
        match self.locks.read_state().get(id) {
            Some(op) => {
                op.progress.cancel();
                tracing::info!(operation_id = id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel and drop every operation past its deadline.
    pub(crate) fn sweep_timeouts(&self) -> Vec<String> {
        let now = Instant::now();
        let mut active = self.locks.write_state();
        let expired: Vec<String> = active
            .values()
            .filter(|op| op.deadline <= now)
            .map(|op| op.id.clone())
            .collect();
        if expired.is_empty() {
            return expired;
        }
        for id in &expired {
            if let Some(op) = active.remove(id) {
                op.progress.cancel();
                tracing::warn!(
                    operation_id = %id,
                    filename = %op.filename,
                    elapsed_ms = millis(op.started.elapsed()),
                    "operation timed out"
                );
            }
        }
        active.write_stats().timed_out += expired.len() as u64;
        expired
    }

    pub(crate) fn active(&self) -> Vec<ActiveOperationInfo> {
        let mut ops: Vec<ActiveOperationInfo> = self
            .locks
            .read_state()
            .values()
            .map(ActiveOperationInfo::from)
            .collect();
        ops.sort_by_key(|op| op.started_at);
        ops
    }

    pub(crate) fn active_count(&self, kind: Option<OperationKind>) -> usize {
        self.locks
            .read_state()
            .values()
            .filter(|op| kind.is_none_or(|k| op.kind == k))
            .count()
    }

    /// Newest first.
    pub(crate) fn recent(&self, limit: usize) -> Vec<OperationEvent> {
        self.locks
            .read_events()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn stats(&self) -> SaveStats {
        self.locks.read_stats().clone()
    }

    pub(crate) fn record_incremental(&self) {
        self.locks.write_stats().incremental_saves += 1;
    }

    pub(crate) fn reset_stats(&self) {
        *self.locks.write_stats() = SaveStats::default();
    }
}

/// Registration of one running operation. Dropping it without
/// [`OperationHandle::finish`] removes the entry without recording stats.
pub(crate) struct OperationHandle<'a> {
    table: &'a OperationTable,
    id: String,
    progress: Arc<OperationProgress>,
    started: Instant,
    finished: bool,
}

impl OperationHandle<'_> {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Move to `stage`, failing if cancellation was requested.
    pub(crate) fn checkpoint(&self, stage: OperationStage) -> Result<()> {
        self.progress.enter(stage);
        if self.progress.is_cancelled() {
            tracing::info!(operation_id = %self.id, %stage, "operation cancelled at checkpoint");
            return Err(PersistenceError::OperationCancelled {
                operation_id: self.id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn finish(mut self, result: &mut SaveOperationResult) {
        let elapsed = self.started.elapsed();
        result.elapsed_ms = millis(elapsed);
        self.table.finish(&self.id, result, elapsed);
        self.finished = true;
    }
}

impl Drop for OperationHandle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.table.abandon(&self.id);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
