//! Async entry points on top of the blocking pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::result::SaveOperationResult;
use super::SaveOrchestrator;
use crate::error::{PersistenceError, Result};

impl SaveOrchestrator {
    /// [`Self::save_game`] on the blocking thread pool.
    pub async fn save_game_async(self: Arc<Self>, filename: String) -> Result<SaveOperationResult> {
        tokio::task::spawn_blocking(move || self.save_game(&filename))
            .await
            .map_err(|source| PersistenceError::TaskJoin { source })
    }

    /// [`Self::load_game`] on the blocking thread pool.
    pub async fn load_game_async(self: Arc<Self>, filename: String) -> Result<SaveOperationResult> {
        tokio::task::spawn_blocking(move || self.load_game(&filename))
            .await
            .map_err(|source| PersistenceError::TaskJoin { source })
    }

    /// Sweep timed-out operations every `period` until the orchestrator is dropped.
    pub fn spawn_timeout_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(orchestrator) = orchestrator.upgrade() else {
                    tracing::debug!("orchestrator dropped, stopping timeout sweeper");
                    break;
                };
                let expired = orchestrator.sweep_timeouts();
                if !expired.is_empty() {
                    tracing::warn!(count = expired.len(), "cancelled timed-out operations");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::tree::TreeValue;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_async_round_trip() {
        let dir = tempdir().unwrap();
        let orchestrator = Arc::new(orchestrator(dir.path()));
        let system = MemorySystem::new("realm", TreeValue::object().with("turn", 3));
        orchestrator.register_system(system.clone());

        let saved = Arc::clone(&orchestrator)
            .save_game_async("slot1".to_string())
            .await
            .unwrap();
        assert!(saved.is_success());
        let loaded = Arc::clone(&orchestrator)
            .load_game_async("slot1".to_string())
            .await
            .unwrap();
        assert!(loaded.is_success());
        assert_eq!(system.last_restored().unwrap(), TreeValue::object().with("turn", 3));
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_orchestrator_dropped() {
        let dir = tempdir().unwrap();
        let orchestrator = Arc::new(orchestrator(dir.path()));
        let handle = orchestrator.spawn_timeout_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(orchestrator);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
