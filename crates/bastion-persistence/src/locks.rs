//! Three-level lock hierarchy: state, then stats, then events.
//!
//! [`OrderedLocks`] owns one `RwLock` per level. Lower levels can only be
//! reached through the guard of a higher level, so taking the stats lock
//! and then the state lock through a guard does not compile. Entering a
//! level directly on the container is still possible; debug builds assert
//! on every acquisition that nothing at the same or a lower level of the
//! same container is already held by the current thread.

use std::ops::{Deref, DerefMut};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Position in the hierarchy. Locks must be taken in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    State = 1,
    Stats = 2,
    Events = 3,
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: std::cell::RefCell<Vec<(usize, LockLevel)>> = const { std::cell::RefCell::new(Vec::new()) };
}

/// Records a held level for the current thread in debug builds.
struct LevelToken {
    #[cfg(debug_assertions)]
    owner: usize,
    #[cfg(debug_assertions)]
    level: LockLevel,
}

impl LevelToken {
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    fn enter(owner: usize, level: LockLevel) -> Self {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            let violation = held
                .iter()
                .find(|(o, l)| *o == owner && *l >= level)
                .map(|(_, l)| *l);
            debug_assert!(
                violation.is_none(),
                "lock order violation: acquiring {level:?} while holding {violation:?}"
            );
            held.push((owner, level));
        });
        Self {
            #[cfg(debug_assertions)]
            owner,
            #[cfg(debug_assertions)]
            level,
        }
    }
}

#[cfg(debug_assertions)]
impl Drop for LevelToken {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held
                .iter()
                .rposition(|&(o, l)| o == self.owner && l == self.level)
            {
                held.remove(pos);
            }
        });
    }
}

/// State, stats and events behind separate locks with a fixed order.
#[derive(Debug, Default)]
pub struct OrderedLocks<S, T, E> {
    state: RwLock<S>,
    stats: RwLock<T>,
    events: RwLock<E>,
}

/// Guard for the state level.
pub struct StateGuard<'a, G, S, T, E> {
    guard: G,
    locks: &'a OrderedLocks<S, T, E>,
    _token: LevelToken,
}

/// Guard for the stats level.
pub struct StatsGuard<'a, G, S, T, E> {
    guard: G,
    locks: &'a OrderedLocks<S, T, E>,
    _token: LevelToken,
}

/// Guard for the events level. Nothing can be acquired below it.
pub struct EventsGuard<G> {
    guard: G,
    _token: LevelToken,
}

pub type StateRead<'a, S, T, E> = StateGuard<'a, RwLockReadGuard<'a, S>, S, T, E>;
pub type StateWrite<'a, S, T, E> = StateGuard<'a, RwLockWriteGuard<'a, S>, S, T, E>;
pub type StatsRead<'a, S, T, E> = StatsGuard<'a, RwLockReadGuard<'a, T>, S, T, E>;
pub type StatsWrite<'a, S, T, E> = StatsGuard<'a, RwLockWriteGuard<'a, T>, S, T, E>;
pub type EventsRead<'a, E> = EventsGuard<RwLockReadGuard<'a, E>>;
pub type EventsWrite<'a, E> = EventsGuard<RwLockWriteGuard<'a, E>>;

impl<S, T, E> OrderedLocks<S, T, E> {
    pub fn new(state: S, stats: T, events: E) -> Self {
        Self {
            state: RwLock::new(state),
            stats: RwLock::new(stats),
            events: RwLock::new(events),
        }
    }

    fn owner(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    pub fn read_state(&self) -> StateRead<'_, S, T, E> {
        let token = LevelToken::enter(self.owner(), LockLevel::State);
        StateGuard {
            guard: self.state.read().unwrap_or_else(PoisonError::into_inner),
            locks: self,
            _token: token,
        }
    }

    pub fn write_state(&self) -> StateWrite<'_, S, T, E> {
        let token = LevelToken::enter(self.owner(), LockLevel::State);
        StateGuard {
            guard: self.state.write().unwrap_or_else(PoisonError::into_inner),
            locks: self,
            _token: token,
        }
    }

    /// Enter at the stats level without touching state.
    pub fn read_stats(&self) -> StatsRead<'_, S, T, E> {
        enter_stats_read(self)
    }

    pub fn write_stats(&self) -> StatsWrite<'_, S, T, E> {
        enter_stats_write(self)
    }

    /// Enter at the events level without touching state or stats.
    pub fn read_events(&self) -> EventsRead<'_, E> {
        enter_events_read(self)
    }

    pub fn write_events(&self) -> EventsWrite<'_, E> {
        enter_events_write(self)
    }
}

fn enter_stats_read<S, T, E>(locks: &OrderedLocks<S, T, E>) -> StatsRead<'_, S, T, E> {
    let token = LevelToken::enter(locks.owner(), LockLevel::Stats);
    StatsGuard {
        guard: locks.stats.read().unwrap_or_else(PoisonError::into_inner),
        locks,
        _token: token,
    }
}

fn enter_stats_write<S, T, E>(locks: &OrderedLocks<S, T, E>) -> StatsWrite<'_, S, T, E> {
    let token = LevelToken::enter(locks.owner(), LockLevel::Stats);
    StatsGuard {
        guard: locks.stats.write().unwrap_or_else(PoisonError::into_inner),
        locks,
        _token: token,
    }
}

fn enter_events_read<S, T, E>(locks: &OrderedLocks<S, T, E>) -> EventsRead<'_, E> {
    let token = LevelToken::enter(locks.owner(), LockLevel::Events);
    EventsGuard {
        guard: locks.events.read().unwrap_or_else(PoisonError::into_inner),
        _token: token,
    }
}

fn enter_events_write<S, T, E>(locks: &OrderedLocks<S, T, E>) -> EventsWrite<'_, E> {
    let token = LevelToken::enter(locks.owner(), LockLevel::Events);
    EventsGuard {
        guard: locks.events.write().unwrap_or_else(PoisonError::into_inner),
        _token: token,
    }
}

impl<'a, G, S, T, E> StateGuard<'a, G, S, T, E> {
    /// Take the stats lock while holding state.
    pub fn read_stats(&self) -> StatsRead<'a, S, T, E> {
        enter_stats_read(self.locks)
    }

    pub fn write_stats(&self) -> StatsWrite<'a, S, T, E> {
        enter_stats_write(self.locks)
    }

    /// Take the events lock while holding state.
    pub fn read_events(&self) -> EventsRead<'a, E> {
        enter_events_read(self.locks)
    }

    pub fn write_events(&self) -> EventsWrite<'a, E> {
        enter_events_write(self.locks)
    }
}

impl<'a, G, S, T, E> StatsGuard<'a, G, S, T, E> {
    /// Take the events lock while holding stats.
    pub fn read_events(&self) -> EventsRead<'a, E> {
        enter_events_read(self.locks)
    }

    pub fn write_events(&self) -> EventsWrite<'a, E> {
        enter_events_write(self.locks)
    }
}

impl<G: Deref, S, T, E> Deref for StateGuard<'_, G, S, T, E> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut, S, T, E> DerefMut for StateGuard<'_, G, S, T, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<G: Deref, S, T, E> Deref for StatsGuard<'_, G, S, T, E> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut, S, T, E> DerefMut for StatsGuard<'_, G, S, T, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<G: Deref> Deref for EventsGuard<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut> DerefMut for EventsGuard<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
