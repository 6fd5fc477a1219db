//! Bounded admission for concurrent saves and loads.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

/// Which pool an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Save,
    Load,
}

impl OperationKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Pool {
    active: usize,
    limit: usize,
    peak: usize,
    acquired: u64,
    timeouts: u64,
}

#[derive(Debug, Default)]
struct GateState {
    saves: Pool,
    loads: Pool,
    peak_total: usize,
}

impl GateState {
    fn pool_mut(&mut self, kind: OperationKind) -> &mut Pool {
        match kind {
            OperationKind::Save => &mut self.saves,
            OperationKind::Load => &mut self.loads,
        }
    }
}

/// Snapshot of gate occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub active_saves: usize,
    pub active_loads: usize,
    pub max_saves: usize,
    pub max_loads: usize,
    pub peak_saves: usize,
    pub peak_loads: usize,
    /// Highest number of saves and loads in flight at once.
    pub peak_total: usize,
    pub acquired: u64,
    pub timeouts: u64,
}

/// Two counting semaphores with timeouts.
pub struct ConcurrencyGate {
    state: Mutex<GateState>,
    freed: Condvar,
}

impl ConcurrencyGate {
    pub fn new(max_saves: usize, max_loads: usize) -> Self {
        let mut state = GateState::default();
        state.saves.limit = max_saves;
        state.loads.limit = max_loads;
        Self {
            state: Mutex::new(state),
            freed: Condvar::new(),
        }
    }

    /// Wait up to `timeout` for a slot of `kind`.
    pub fn acquire(&self, kind: OperationKind, timeout: Duration) -> Result<SlotGuard<'_>> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut state = self.lock();
        loop {
            if let Some(guard) = self.try_take(&mut state, kind) {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                state.pool_mut(kind).timeouts += 1;
                let waited_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(%kind, waited_ms, "no free slot before timeout");
                return Err(PersistenceError::ConcurrentLimitExceeded { kind, waited_ms });
            }
            state = self
                .freed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, kind: OperationKind) -> Option<SlotGuard<'_>> {
        let mut state = self.lock();
        self.try_take(&mut state, kind)
    }

    /// Change pool sizes. Running operations keep their slots.
    pub fn set_limits(&self, max_saves: usize, max_loads: usize) {
        {
            let mut state = self.lock();
            state.saves.limit = max_saves;
            state.loads.limit = max_loads;
        }
        self.freed.notify_all();
    }

    pub fn stats(&self) -> GateStats {
        let state = self.lock();
        GateStats {
            active_saves: state.saves.active,
            active_loads: state.loads.active,
            max_saves: state.saves.limit,
            max_loads: state.loads.limit,
            peak_saves: state.saves.peak,
            peak_loads: state.loads.peak,
            peak_total: state.peak_total,
            acquired: state.saves.acquired + state.loads.acquired,
            timeouts: state.saves.timeouts + state.loads.timeouts,
        }
    }

    fn try_take(&self, state: &mut GateState, kind: OperationKind) -> Option<SlotGuard<'_>> {
        let pool = state.pool_mut(kind);
        if pool.active >= pool.limit {
            return None;
        }
        pool.active += 1;
        pool.acquired += 1;
        pool.peak = pool.peak.max(pool.active);
        let total = state.saves.active + state.loads.active;
        state.peak_total = state.peak_total.max(total);
        Some(SlotGuard { gate: self, kind })
    }

    fn release(&self, kind: OperationKind) {
        {
            let mut state = self.lock();
            let pool = state.pool_mut(kind);
            pool.active = pool.active.saturating_sub(1);
        }
        self.freed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one slot; released on drop.
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SlotGuard<'a> {
    gate: &'a ConcurrencyGate,
    kind: OperationKind,
}

impl SlotGuard<'_> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_slots_are_bounded() {
        let gate = ConcurrencyGate::new(2, 1);
        let a = gate.try_acquire(OperationKind::Save);
        let b = gate.try_acquire(OperationKind::Save);
        assert!(a.is_some() && b.is_some());
        assert!(gate.try_acquire(OperationKind::Save).is_none());
        // pools are independent
        assert!(gate.try_acquire(OperationKind::Load).is_some());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let gate = ConcurrencyGate::new(1, 1);
        {
            let _slot = gate.acquire(OperationKind::Save, Duration::from_millis(10)).unwrap();
            assert_eq!(gate.stats().active_saves, 1);
        }
        assert_eq!(gate.stats().active_saves, 0);
        assert!(gate.try_acquire(OperationKind::Save).is_some());
    }

    #[test]
    fn test_timeout_yields_concurrent_limit_exceeded() {
        let gate = ConcurrencyGate::new(1, 1);
        let _held = gate.try_acquire(OperationKind::Save).unwrap();
        let start = Instant::now();
        let err = gate
            .acquire(OperationKind::Save, Duration::from_millis(50))
            .err()
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(err.kind(), crate::ErrorKind::ConcurrentLimitExceeded);
        assert_eq!(gate.stats().timeouts, 1);
    }

    #[test]
    fn test_waiter_proceeds_when_slot_frees() {
        let gate = Arc::new(ConcurrencyGate::new(1, 1));
        let held = gate.try_acquire(OperationKind::Load).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.acquire(OperationKind::Load, Duration::from_secs(5))
                    .map(|slot| slot.kind())
                    .is_ok()
            })
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_peak_tracking() {
        let gate = ConcurrencyGate::new(3, 3);
        let s1 = gate.try_acquire(OperationKind::Save);
        let s2 = gate.try_acquire(OperationKind::Save);
        let l1 = gate.try_acquire(OperationKind::Load);
        drop((s1, s2, l1));
        let stats = gate.stats();
        assert_eq!(stats.peak_saves, 2);
        assert_eq!(stats.peak_loads, 1);
        assert_eq!(stats.peak_total, 3);
        assert_eq!(stats.active_saves + stats.active_loads, 0);
    }
}
