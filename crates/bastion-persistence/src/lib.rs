//! Crash-safe persistence for application state.
//!
//! This crate saves a set of named systems to disk and restores them,
//! making sure a crash, a damaged file or a concurrent operation never
//! destroys the last good save.
//!
//! # Features
//!
//! - **Atomic writes** through a synced temp file and a rename
//! - **Integrity checks**: CRC32 over the stored payload and a SHA-256
//!   content checksum inside the document
//! - **Pluggable compression** (deflate, optional zstd) with a size policy
//! - **Schema migrations** found by shortest path over registered steps
//! - **Crash recovery** from timestamped backups
//! - **Incremental saves** driven by per-system dirty tracking
//! - **Bounded concurrency** for saves and loads, with timeouts
//!
//! # File Format
//!
//! `.save` files are a fixed little-endian header followed by the payload:
//!
//! ```text
//! +----------------------+
//! | Magic: "BSAV"        | 4 bytes
//! | Format version       | u16
//! | Algorithm id         | u16
//! | Original size        | u64
//! | Stored size          | u64
//! | CRC32 of payload     | u32
//! | Reserved             | u32
//! +----------------------+
//! | Payload              | canonical JSON document, possibly compressed
//! +----------------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bastion_persistence::{PersistenceConfig, SaveOrchestrator, SaveVersion};
//!
//! let orchestrator = SaveOrchestrator::new(PersistenceConfig::new("saves"), SaveVersion::new(1, 2, 0))?;
//! orchestrator.register_system(Arc::new(MyRealm::default()));
//!
//! let saved = orchestrator.save_game("slot1");
//! assert!(saved.is_success());
//!
//! let loaded = orchestrator.load_game("slot1");
//! println!("{loaded}");
//! ```
//!
//! # Architecture
//!
//! The crate is organized into:
//!
//! - `checksum`, `compression`, `canonical` - byte-level integrity and encoding
//! - `path` - confining filenames to the save directory
//! - `migration`, `validation` - schema evolution and document checks
//! - `io`, `recovery` - atomic files, backups and repair
//! - `autosave` - dirty tracking for incremental saves
//! - `gate`, `locks` - admission control and lock ordering
//! - `orchestrator` - the save/load pipeline tying it together
//! - `error.rs` - error types with user-friendly messages

pub mod autosave;
pub mod canonical;
pub mod checksum;
pub mod compression;
pub mod config;
mod error;
pub mod format;
pub mod gate;
pub mod io;
pub mod locks;
pub mod migration;
pub mod orchestrator;
pub mod path;
pub mod recovery;
mod system;
pub mod tree;
pub mod validation;
mod version;

#[cfg(any(test, feature = "chaos"))]
pub mod chaos;

// Re-export main types
pub use autosave::{
    DirtyFlag, DirtySystemFilter, IncrementalSaveConfig, IncrementalSaveTracker, SaveStrategy,
    TriggerReason,
};
pub use canonical::CanonicalSerializer;
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionEngine};
pub use config::PersistenceConfig;
pub use error::{ErrorKind, PersistenceError, Result};
pub use gate::{ConcurrencyGate, OperationKind};
pub use migration::MigrationEngine;
pub use orchestrator::{
    DiskState, Outcome, SaveOperationResult, SaveOrchestrator, StatisticsSnapshot,
    VerificationReport, VerifyOptions,
};
pub use path::{PathError, PathResolver};
pub use recovery::{CrashRecoveryManager, RecoveryReport};
pub use system::PersistentSystem;
pub use tree::TreeValue;
pub use validation::{SaveValidator, Severity, ValidationIssue, ValidationReport};
pub use version::{SaveVersion, VersionParseError};
