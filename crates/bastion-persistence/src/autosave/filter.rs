//! Selection and ordering of systems for an incremental save.

use std::cmp::Reverse;

use super::tracker::{DirtyFlag, IncrementalSaveTracker, SystemStateSnapshot};

/// Priority given to critical systems, above any age-based score.
const CRITICAL_PRIORITY: u64 = 1000;

/// Stateless helpers over tracker snapshots.
pub struct DirtySystemFilter;

impl DirtySystemFilter {
    pub fn dirty(states: &[SystemStateSnapshot]) -> Vec<SystemStateSnapshot> {
        states.iter().filter(|s| s.is_dirty()).cloned().collect()
    }

    pub fn clean(states: &[SystemStateSnapshot]) -> Vec<SystemStateSnapshot> {
        states.iter().filter(|s| !s.is_dirty()).cloned().collect()
    }

    pub fn critical(states: &[SystemStateSnapshot]) -> Vec<SystemStateSnapshot> {
        states
            .iter()
            .filter(|s| s.flag == DirtyFlag::Critical)
            .cloned()
            .collect()
    }

    /// Critical systems score 1000, everything else the seconds since its
    /// last save. Never-saved systems count as critical.
    pub fn priority(state: &SystemStateSnapshot) -> u64 {
        if state.flag == DirtyFlag::Critical {
            return CRITICAL_PRIORITY;
        }
        state
            .time_since_save()
            .map_or(CRITICAL_PRIORITY, |age| age.as_secs())
    }

    /// Highest priority first; ties broken by name.
    pub fn sort_by_priority(states: &mut [SystemStateSnapshot]) {
        states.sort_by(|a, b| {
            Self::priority(b)
                .cmp(&Self::priority(a))
                .then_with(|| a.name.cmp(&b.name))
        });
    }

    /// Largest estimated size first.
    pub fn sort_by_size(states: &mut [SystemStateSnapshot]) {
        states.sort_by_key(|s| (Reverse(s.estimated_size), s.name.clone()));
    }

    /// Dirty system names in the order they should be written.
    pub fn systems_to_save(tracker: &IncrementalSaveTracker) -> Vec<String> {
        let mut dirty = Self::dirty(&tracker.states());
        Self::sort_by_priority(&mut dirty);
        dirty.into_iter().map(|s| s.name).collect()
    }
}
