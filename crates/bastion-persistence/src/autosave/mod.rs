//! Incremental save bookkeeping.
//!
//! Provides:
//! - `IncrementalSaveTracker` - per-system dirty flags, thresholds and content hashes
//! - `IncrementalSaveConfig` - when accumulated changes should be flushed
//! - `DirtySystemFilter` - which dirty systems to write, and in what order

mod config;
mod filter;
mod tracker;

pub use config::{IncrementalSaveConfig, TriggerReason};
pub use filter::DirtySystemFilter;
pub use tracker::{
    ChangeCallback, ChangeEvent, DirtyFlag, IncrementalSaveTracker, SaveOptimizationHints,
    SaveStrategy, SystemStateSnapshot, TrackerStatistics,
};
