//! The boundary between the engine and application state.

use crate::tree::TreeValue;
use crate::version::SaveVersion;

/// A named piece of application state that can be saved and restored.
///
/// The engine never looks inside the trees a system produces; it only
/// hashes, stores and hands them back.
pub trait PersistentSystem: Send + Sync {
    /// Unique key of this system inside a save document.
    fn name(&self) -> &str;

    /// Snapshot the current state. `None` means the system could not
    /// produce a snapshot and fails the save.
    fn serialize(&self, version: &SaveVersion) -> Option<TreeValue>;

    /// Restore from a snapshot written at `version` (already migrated to
    /// the current schema). Returns `false` if the data was rejected.
    fn deserialize(&self, data: &TreeValue, version: &SaveVersion) -> bool;

    /// Rough encoded size, used for incremental save planning.
    fn estimated_size(&self) -> usize {
        0
    }
}
