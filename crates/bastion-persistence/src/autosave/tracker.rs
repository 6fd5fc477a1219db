//! Per-system dirty state tracking for incremental saves.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{IncrementalSaveConfig, TriggerReason};
use crate::canonical::to_canonical_bytes;
use crate::checksum::{fnv1a_64, sampled_hash_64};
use crate::locks::OrderedLocks;
use crate::tree::TreeValue;

/// Fraction of tracked bytes above which a full save is cheaper.
const FULL_SAVE_DIRTY_RATIO: f64 = 0.60;

/// Dirty state of one system, ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyFlag {
    Clean,
    /// Only some sub-entities changed.
    PartiallyDirty,
    Dirty,
    /// Must be persisted as soon as possible.
    Critical,
}

impl DirtyFlag {
    pub const fn is_dirty(self) -> bool {
        !matches!(self, Self::Clean)
    }
}

/// Tracked state of one system.
#[derive(Debug, Clone)]
pub struct SystemStateSnapshot {
    pub name: String,
    pub flag: DirtyFlag,
    pub change_count: u64,
    pub estimated_size: u64,
    pub last_modified: Option<Instant>,
    pub last_saved: Option<Instant>,
    /// When the system last went from clean to dirty.
    pub dirty_since: Option<Instant>,
    pub content_hash: Option<u64>,
}

impl SystemStateSnapshot {
    fn new(name: &str, estimated_size: u64) -> Self {
        Self {
            name: name.to_string(),
            flag: DirtyFlag::Clean,
            change_count: 0,
            estimated_size,
            last_modified: None,
            last_saved: None,
            dirty_since: None,
            content_hash: None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.flag.is_dirty()
    }

    /// Time since the last successful save, `None` if never saved.
    pub fn time_since_save(&self) -> Option<Duration> {
        self.last_saved.map(|t| t.elapsed())
    }
}

/// A recorded state transition.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub system: String,
    pub previous: DirtyFlag,
    pub current: DirtyFlag,
    pub at: DateTime<Utc>,
}

/// Tracker counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerStatistics {
    pub dirty_marks: u64,
    pub clean_marks: u64,
    pub critical_marks: u64,
    pub auto_save_triggers: u64,
    pub immediate_save_triggers: u64,
    pub hash_computations: u64,
    /// Writes skipped because the content hash was unchanged.
    pub unchanged_writes: u64,
}

/// How the next save should be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Serialize every system.
    Full,
    /// Serialize only dirty systems.
    Incremental,
    /// Save critical systems immediately.
    Priority,
    /// Dirty, but no threshold reached yet.
    Deferred,
    NoSaveNeeded,
}

/// Advice derived from the current dirty state.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOptimizationHints {
    pub dirty_count: usize,
    pub total_count: usize,
    pub dirty_bytes: u64,
    pub total_bytes: u64,
    /// Dirty share of tracked bytes (of systems when sizes are unknown).
    pub dirty_ratio: f64,
    pub recommend_full_save: bool,
    pub suggestions: Vec<String>,
}

/// Called after every state transition, outside the tracker's locks.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type SystemStates = HashMap<String, SystemStateSnapshot>;

/// Tracks which systems have unsaved changes.
///
/// Lock order: system states, then statistics, then change history.
pub struct IncrementalSaveTracker {
    config: IncrementalSaveConfig,
    locks: OrderedLocks<SystemStates, TrackerStatistics, VecDeque<ChangeEvent>>,
    callback: RwLock<Option<ChangeCallback>>,
}

impl Default for IncrementalSaveTracker {
    fn default() -> Self {
        Self::new(IncrementalSaveConfig::default())
    }
}

impl IncrementalSaveTracker {
    pub fn new(config: IncrementalSaveConfig) -> Self {
        Self {
            config,
            locks: OrderedLocks::new(
                HashMap::new(),
                TrackerStatistics::default(),
                VecDeque::new(),
            ),
            callback: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &IncrementalSaveConfig {
        &self.config
    }

    /// Start tracking a system (no-op if already tracked).
    pub fn register_system(&self, name: &str, estimated_size: u64) {
        self.locks
            .write_state()
            .entry(name.to_string())
            .or_insert_with(|| SystemStateSnapshot::new(name, estimated_size));
    }

    pub fn unregister_system(&self, name: &str) -> bool {
        self.locks.write_state().remove(name).is_some()
    }

    pub fn set_change_callback(&self, callback: ChangeCallback) {
        *self
            .callback
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(callback);
    }

    pub fn clear_change_callback(&self) {
        *self
            .callback
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Mark a system as changed. Flags only escalate until the next save;
    /// marking `Clean` is the same as [`Self::mark_clean`].
    pub fn mark_dirty(&self, name: &str, flag: DirtyFlag) {
        if flag == DirtyFlag::Clean {
            self.mark_clean(name);
            return;
        }
        let events = self.transition(&[name], |snapshot, now| Self::dirty_snapshot(snapshot, flag, now));
        self.notify(&events);
    }

    /// Mark dirty and update the size estimate in one step.
    pub fn mark_dirty_with_size(&self, name: &str, flag: DirtyFlag, estimated_size: u64) {
        self.set_estimated_size(name, estimated_size);
        self.mark_dirty(name, flag);
    }

    /// Mark a system as saved.
    pub fn mark_clean(&self, name: &str) {
        let events = self.transition(&[name], Self::clean_snapshot);
        self.notify(&events);
    }

    pub fn mark_systems_dirty(&self, names: &[&str], flag: DirtyFlag) {
        if flag == DirtyFlag::Clean {
            self.mark_systems_clean(names);
            return;
        }
        let events = self.transition(names, |snapshot, now| Self::dirty_snapshot(snapshot, flag, now));
        self.notify(&events);
    }

    pub fn mark_systems_clean(&self, names: &[&str]) {
        let events = self.transition(names, Self::clean_snapshot);
        self.notify(&events);
    }

    pub fn mark_all_clean(&self) {
        let names: Vec<String> = self.locks.read_state().keys().cloned().collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.mark_systems_clean(&refs);
    }

    pub fn set_estimated_size(&self, name: &str, estimated_size: u64) {
        self.locks
            .write_state()
            .entry(name.to_string())
            .or_insert_with(|| SystemStateSnapshot::new(name, 0))
            .estimated_size = estimated_size;
    }

    pub fn state(&self, name: &str) -> Option<SystemStateSnapshot> {
        self.locks.read_state().get(name).cloned()
    }

    /// All tracked systems, sorted by name.
    pub fn states(&self) -> Vec<SystemStateSnapshot> {
        let mut states: Vec<_> = self.locks.read_state().values().cloned().collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.state(name).is_some_and(|s| s.is_dirty())
    }

    /// Names of dirty systems, sorted.
    pub fn dirty_systems(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .locks
            .read_state()
            .values()
            .filter(|s| s.is_dirty())
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn critical_systems(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .locks
            .read_state()
            .values()
            .filter(|s| s.flag == DirtyFlag::Critical)
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn dirty_count(&self) -> usize {
        self.locks
            .read_state()
            .values()
            .filter(|s| s.is_dirty())
            .count()
    }

    pub fn total_dirty_size(&self) -> u64 {
        self.locks
            .read_state()
            .values()
            .filter(|s| s.is_dirty())
            .map(|s| s.estimated_size)
            .sum()
    }

    /// Why an auto-save is due, if it is.
    pub fn trigger_reason(&self) -> Option<TriggerReason> {
        let states = self.locks.read_state();
        if self.config.immediate_save_on_critical
            && let Some(critical) = states
                .values()
                .filter(|s| s.flag == DirtyFlag::Critical)
                .map(|s| s.name.clone())
                .min()
        {
            return Some(TriggerReason::CriticalChange { system: critical });
        }

        self.threshold_reason(&states)
    }

    fn threshold_reason(&self, states: &SystemStates) -> Option<TriggerReason> {
        let dirty: Vec<&SystemStateSnapshot> = states.values().filter(|s| s.is_dirty()).collect();
        let dirty_bytes = dirty.iter().map(|s| s.estimated_size).sum();
        let oldest_ms = dirty
            .iter()
            .filter_map(|s| s.dirty_since)
            .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX))
            .max();
        self.config.evaluate(dirty.len(), dirty_bytes, oldest_ms)
    }

    /// True when any count, size or age threshold is reached.
    pub fn should_trigger_auto_save(&self) -> bool {
        let reason = self.threshold_reason(&self.locks.read_state());
        if reason.is_some() {
            self.locks.write_stats().auto_save_triggers += 1;
        }
        reason.is_some()
    }

    /// True iff some system is critical.
    pub fn should_trigger_immediate_save(&self) -> bool {
        if !self.config.immediate_save_on_critical {
            return false;
        }
        let state = self.locks.read_state();
        let critical = state.values().any(|s| s.flag == DirtyFlag::Critical);
        if critical {
            state.write_stats().immediate_save_triggers += 1;
        }
        critical
    }

    fn hash(&self, bytes: &[u8]) -> u64 {
        if self.config.fast_hash_mode {
            sampled_hash_64(bytes)
        } else {
            fnv1a_64(bytes)
        }
    }

    /// Record the hash of a system's serialized bytes.
    pub fn update_content_hash(&self, name: &str, bytes: &[u8]) -> u64 {
        let hash = self.hash(bytes);
        let mut states = self.locks.write_state();
        states
            .entry(name.to_string())
            .or_insert_with(|| SystemStateSnapshot::new(name, 0))
            .content_hash = Some(hash);
        states.write_stats().hash_computations += 1;
        hash
    }

    /// Record the hash of a system's tree in canonical form, the same value
    /// [`Self::update_content_hash`] records for `to_canonical_bytes(tree)`.
    pub fn update_content_hash_from_tree(&self, name: &str, tree: &TreeValue) -> Option<u64> {
        match to_canonical_bytes(tree) {
            Ok(bytes) => Some(self.update_content_hash(name, &bytes)),
            Err(e) => {
                tracing::warn!(system = name, error = %e, "could not hash system tree");
                None
            }
        }
    }

    /// [`Self::has_content_changed`] over the canonical form of `tree`.
    pub fn has_tree_changed(&self, name: &str, tree: &TreeValue) -> bool {
        to_canonical_bytes(tree).map_or(true, |bytes| self.has_content_changed(name, &bytes))
    }

    /// True when `bytes` differ from the last recorded hash (or none exists).
    pub fn has_content_changed(&self, name: &str, bytes: &[u8]) -> bool {
        if !self.config.enable_content_hashing {
            return true;
        }
        let hash = self.hash(bytes);
        let states = self.locks.read_state();
        states.write_stats().hash_computations += 1;
        states.get(name).and_then(|s| s.content_hash) != Some(hash)
    }

    /// Mark dirty only when the content actually changed; records the new hash.
    pub fn mark_dirty_if_changed(&self, name: &str, bytes: &[u8], flag: DirtyFlag) -> bool {
        if self.has_content_changed(name, bytes) {
            self.update_content_hash(name, bytes);
            self.mark_dirty(name, flag);
            true
        } else {
            self.locks.write_stats().unchanged_writes += 1;
            false
        }
    }

    /// Latest `limit` change events, newest last.
    pub fn recent_changes(&self, limit: usize) -> Vec<ChangeEvent> {
        let history = self.locks.read_events();
        history
            .iter()
            .skip(history.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> TrackerStatistics {
        self.locks.read_stats().clone()
    }

    pub fn reset_statistics(&self) {
        *self.locks.write_stats() = TrackerStatistics::default();
    }

    pub fn optimization_hints(&self) -> SaveOptimizationHints {
        let states = self.locks.read_state();
        let total_count = states.len();
        let dirty: Vec<&SystemStateSnapshot> = states.values().filter(|s| s.is_dirty()).collect();
        let dirty_count = dirty.len();
        let total_bytes: u64 = states.values().map(|s| s.estimated_size).sum();
        let dirty_bytes: u64 = dirty.iter().map(|s| s.estimated_size).sum();

        let dirty_ratio = if total_bytes > 0 {
            dirty_bytes as f64 / total_bytes as f64
        } else if total_count > 0 {
            dirty_count as f64 / total_count as f64
        } else {
            0.0
        };
        let recommend_full_save = dirty_ratio > FULL_SAVE_DIRTY_RATIO;

        let mut suggestions = Vec::new();
        if recommend_full_save {
            suggestions.push(format!(
                "{:.0}% of tracked data is dirty; a full save avoids merging stale sections",
                dirty_ratio * 100.0
            ));
        }
        if dirty.iter().any(|s| s.flag == DirtyFlag::Critical) {
            suggestions.push("critical systems are dirty; save them first".to_string());
        }
        if let Some(largest) = dirty.iter().max_by_key(|s| s.estimated_size)
            && largest.estimated_size >= self.config.dirty_size_threshold_bytes / 2
            && largest.estimated_size > 0
        {
            suggestions.push(format!(
                "'{}' dominates the dirty size ({} bytes)",
                largest.name, largest.estimated_size
            ));
        }

        SaveOptimizationHints {
            dirty_count,
            total_count,
            dirty_bytes,
            total_bytes,
            dirty_ratio,
            recommend_full_save,
            suggestions,
        }
    }

    pub fn determine_save_strategy(&self) -> SaveStrategy {
        let hints = self.optimization_hints();
        if hints.dirty_count == 0 {
            return SaveStrategy::NoSaveNeeded;
        }
        if self.config.immediate_save_on_critical && !self.critical_systems().is_empty() {
            return SaveStrategy::Priority;
        }
        if hints.recommend_full_save {
            return SaveStrategy::Full;
        }
        if self.trigger_reason().is_none() {
            return SaveStrategy::Deferred;
        }
        SaveStrategy::Incremental
    }

    fn dirty_snapshot(snapshot: &mut SystemStateSnapshot, flag: DirtyFlag, now: Instant) {
        snapshot.flag = snapshot.flag.max(flag);
        snapshot.change_count += 1;
        snapshot.last_modified = Some(now);
        if snapshot.dirty_since.is_none() {
            snapshot.dirty_since = Some(now);
        }
    }

    fn clean_snapshot(snapshot: &mut SystemStateSnapshot, now: Instant) {
        snapshot.flag = DirtyFlag::Clean;
        snapshot.last_saved = Some(now);
        snapshot.dirty_since = None;
    }

    /// Apply `update` to each named system, recording stats and events.
    fn transition<F>(&self, names: &[&str], update: F) -> Vec<ChangeEvent>
    where
        F: Fn(&mut SystemStateSnapshot, Instant),
    {
        let now = Instant::now();
        let at = Utc::now();
        let mut events = Vec::with_capacity(names.len());

        let mut states = self.locks.write_state();
        for name in names {
            let snapshot = states
                .entry((*name).to_string())
                .or_insert_with(|| SystemStateSnapshot::new(name, 0));
            let previous = snapshot.flag;
            update(snapshot, now);
            events.push(ChangeEvent {
                system: (*name).to_string(),
                previous,
                current: snapshot.flag,
                at,
            });
        }

        let mut stats = states.write_stats();
        for event in &events {
            match event.current {
                DirtyFlag::Clean => stats.clean_marks += 1,
                DirtyFlag::Critical => {
                    stats.dirty_marks += 1;
                    stats.critical_marks += 1;
                }
                _ => stats.dirty_marks += 1,
            }
        }

        let capacity = self.config.history_capacity;
        if capacity > 0 {
            let mut history = stats.write_events();
            for event in &events {
                if history.len() >= capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        events
    }

    fn notify(&self, events: &[ChangeEvent]) {
        let callback = self
            .callback
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            for event in events {
                callback(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    fn tracker() -> IncrementalSaveTracker {
        IncrementalSaveTracker::default()
    }

    #[test]
    fn test_new_tracker_is_clean() {
        let tracker = tracker();
        tracker.register_system("economy", 100);
        assert_eq!(tracker.dirty_count(), 0);
        assert!(!tracker.should_trigger_auto_save());
        assert_eq!(tracker.determine_save_strategy(), SaveStrategy::NoSaveNeeded);
    }

    #[test]
    fn test_three_dirty_systems_trigger_auto_save() {
        let tracker = tracker();
        tracker.mark_dirty("economy", DirtyFlag::Dirty);
        tracker.mark_dirty("diplomacy", DirtyFlag::Dirty);
        assert!(!tracker.should_trigger_auto_save());
        tracker.mark_dirty("military", DirtyFlag::PartiallyDirty);
        assert!(tracker.should_trigger_auto_save());

        tracker.mark_all_clean();
        assert!(!tracker.should_trigger_auto_save());
        assert_eq!(tracker.statistics().auto_save_triggers, 1);
    }

    #[test]
    fn test_flags_escalate_until_clean() {
        let tracker = tracker();
        tracker.mark_dirty("economy", DirtyFlag::Critical);
        tracker.mark_dirty("economy", DirtyFlag::PartiallyDirty);
        let state = tracker.state("economy").unwrap();
        assert_eq!(state.flag, DirtyFlag::Critical);
        assert_eq!(state.change_count, 2);

        tracker.mark_clean("economy");
        let state = tracker.state("economy").unwrap();
        assert_eq!(state.flag, DirtyFlag::Clean);
        assert!(state.last_saved.is_some());
        assert!(state.dirty_since.is_none());
    }

    #[test]
    fn test_critical_triggers_immediate_save() {
        let tracker = tracker();
        tracker.mark_dirty("economy", DirtyFlag::Dirty);
        assert!(!tracker.should_trigger_immediate_save());
        tracker.mark_dirty("realm", DirtyFlag::Critical);
        assert!(tracker.should_trigger_immediate_save());
        assert_eq!(
            tracker.trigger_reason(),
            Some(TriggerReason::CriticalChange {
                system: "realm".into()
            })
        );
        assert_eq!(tracker.determine_save_strategy(), SaveStrategy::Priority);
    }

    #[test]
    fn test_size_threshold() {
        let tracker = tracker();
        tracker.mark_dirty_with_size("map", DirtyFlag::Dirty, 2 * 1024 * 1024);
        assert!(tracker.should_trigger_auto_save());
        assert!(matches!(
            tracker.trigger_reason(),
            Some(TriggerReason::DirtySize { .. })
        ));
    }

    #[test]
    fn test_time_threshold() {
        let tracker = IncrementalSaveTracker::new(IncrementalSaveConfig {
            dirty_time_threshold_ms: 30,
            ..Default::default()
        });
        tracker.mark_dirty("economy", DirtyFlag::Dirty);
        assert!(!tracker.should_trigger_auto_save());
        thread::sleep(Duration::from_millis(40));
        assert!(tracker.should_trigger_auto_save());
    }

    #[test]
    fn test_content_hash_skips_identical_writes() {
        let tracker = tracker();
        let bytes = b"{\"gold\":100}";
        assert!(tracker.mark_dirty_if_changed("economy", bytes, DirtyFlag::Dirty));
        tracker.mark_clean("economy");
        assert!(!tracker.mark_dirty_if_changed("economy", bytes, DirtyFlag::Dirty));
        assert!(!tracker.is_dirty("economy"));
        assert!(tracker.mark_dirty_if_changed("economy", b"{\"gold\":90}", DirtyFlag::Dirty));
        assert_eq!(tracker.statistics().unchanged_writes, 1);
    }

    #[test]
    fn test_tree_hash_matches_canonical_byte_hash() {
        let tracker = IncrementalSaveTracker::default();
        let tree = TreeValue::object().with("gold", 10).with("grain", 4);
        tracker.update_content_hash_from_tree("economy", &tree).unwrap();

        let reordered = TreeValue::object().with("grain", 4).with("gold", 10);
        let bytes = to_canonical_bytes(&reordered).unwrap();
        assert!(!tracker.has_content_changed("economy", &bytes));
        assert!(!tracker.has_tree_changed("economy", &tree));
        assert!(tracker.has_tree_changed("economy", &tree.clone().with("gold", 11)));
    }

    #[test]
    fn test_content_hashing_disabled_always_changed() {
        let tracker = IncrementalSaveTracker::new(IncrementalSaveConfig {
            enable_content_hashing: false,
            ..Default::default()
        });
        tracker.update_content_hash("a", b"same");
        assert!(tracker.has_content_changed("a", b"same"));
    }

    #[test]
    fn test_history_is_bounded() {
        let tracker = IncrementalSaveTracker::new(IncrementalSaveConfig {
            history_capacity: 3,
            ..Default::default()
        });
        for i in 0..5 {
            tracker.mark_dirty(&format!("s{i}"), DirtyFlag::Dirty);
        }
        let recent = tracker.recent_changes(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].system, "s2");
        assert_eq!(tracker.recent_changes(1)[0].system, "s4");
    }

    #[test]
    fn test_callback_sees_transitions() {
        let tracker = tracker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.set_change_callback(Arc::new(move |event: &ChangeEvent| {
            sink.lock().unwrap().push((event.system.clone(), event.current));
        }));
        tracker.mark_dirty("economy", DirtyFlag::Dirty);
        tracker.mark_clean("economy");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("economy".to_string(), DirtyFlag::Dirty),
                ("economy".to_string(), DirtyFlag::Clean)
            ]
        );
    }

    #[test]
    fn test_callback_may_query_tracker() {
        let tracker = Arc::new(tracker());
        let inner = Arc::downgrade(&tracker);
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        tracker.set_change_callback(Arc::new(move |_: &ChangeEvent| {
            if let Some(tracker) = inner.upgrade() {
                sink.lock().unwrap().push(tracker.dirty_count());
            }
        }));
        tracker.mark_dirty("a", DirtyFlag::Dirty);
        assert_eq!(*counts.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_full_save_recommended_when_mostly_dirty() {
        let tracker = tracker();
        tracker.register_system("small", 100);
        tracker.register_system("big", 900);
        tracker.mark_dirty("big", DirtyFlag::Dirty);
        let hints = tracker.optimization_hints();
        assert!(hints.recommend_full_save);
        assert!((hints.dirty_ratio - 0.9).abs() < 1e-9);
        assert_eq!(tracker.determine_save_strategy(), SaveStrategy::Full);
    }

    #[test]
    fn test_deferred_and_incremental_strategies() {
        let tracker = tracker();
        for name in ["a", "b", "c", "d", "e", "f"] {
            tracker.register_system(name, 100);
        }
        tracker.mark_dirty("a", DirtyFlag::Dirty);
        assert_eq!(tracker.determine_save_strategy(), SaveStrategy::Deferred);
        tracker.mark_systems_dirty(&["b", "c"], DirtyFlag::Dirty);
        assert_eq!(tracker.determine_save_strategy(), SaveStrategy::Incremental);
    }
}
