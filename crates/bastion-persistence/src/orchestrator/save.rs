//! Save pipeline: serialize, seal, compress, atomic write, backup rotation.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;

use super::operations::{OperationHandle, OperationStage};
use super::result::{DiskState, SaveOperationResult};
use super::SaveOrchestrator;
use crate::autosave::{DirtySystemFilter, IncrementalSaveTracker, SaveStrategy};
use crate::checksum;
use crate::error::{PersistenceError, Result};
use crate::format::{self, SealedDocument};
use crate::gate::OperationKind;
use crate::io::{self, StagedFile};
use crate::tree::TreeValue;

/// Which systems a save serializes.
#[derive(Clone, Copy)]
enum SavePlan<'a> {
    Full,
    Incremental(&'a IncrementalSaveTracker),
}

impl SaveOrchestrator {
    /// Serialize every registered system into `filename`.
    ///
    /// Until the final rename the previous file is untouched; a failure
    /// anywhere before it leaves the result's disk state `Unchanged`.
    pub fn save_game(&self, filename: &str) -> SaveOperationResult {
        self.execute(OperationKind::Save, filename, |op, result| {
            self.run_save(op, result, filename, SavePlan::Full)
        })
    }

    /// Re-serialize only the systems `tracker` reports dirty, reusing the
    /// stored data of clean systems from the existing file.
    ///
    /// Falls back to a full save when the existing file is missing,
    /// unreadable or from another version, or when most tracked data is
    /// dirty anyway. Saved systems are marked clean in `tracker`.
    pub fn save_incremental(
        &self,
        filename: &str,
        tracker: &IncrementalSaveTracker,
    ) -> SaveOperationResult {
        self.execute(OperationKind::Save, filename, |op, result| {
            self.run_save(op, result, filename, SavePlan::Incremental(tracker))
        })
    }

    fn run_save(
        &self,
        op: &OperationHandle<'_>,
        result: &mut SaveOperationResult,
        filename: &str,
        plan: SavePlan<'_>,
    ) -> Result<()> {
        op.checkpoint(OperationStage::Resolving)?;
        let path = self.resolve_primary(filename)?;
        result.path = Some(path.clone());

        let _slot = self.gate.acquire(OperationKind::Save, self.config.slot_timeout())?;

        op.checkpoint(OperationStage::Serializing)?;
        let (systems, fresh) = match plan {
            SavePlan::Full => {
                let systems = self.serialize_systems(None)?;
                let fresh = systems.clone();
                (systems, fresh)
            }
            SavePlan::Incremental(tracker) => {
                match self.collect_incremental(&path, tracker, result)? {
                    Some(collected) => collected,
                    None => {
                        result.succeed("no systems changed since the last save");
                        return Ok(());
                    }
                }
            }
        };
        result.systems = fresh.iter().map(|(name, _)| name.clone()).collect();

        let header = format::document_header(&self.current_version, Utc::now());
        let sealed = format::seal_document(header, systems, &self.canonical, &path)?;
        self.write_document(op, result, &path, sealed)?;
        result.version_saved = Some(self.current_version.clone());

        if let SavePlan::Incremental(tracker) = plan {
            for (name, tree) in &fresh {
                tracker.mark_clean(name);
                tracker.update_content_hash_from_tree(name, tree);
            }
            self.operations.record_incremental();
        }

        if result.message.is_empty() {
            result.succeed(format!(
                "saved {} system(s) to {}",
                result.systems.len() + result.systems_reused.len(),
                path.display()
            ));
        }
        Ok(())
    }

    /// Serialize registered systems, or only those named in `only`.
    fn serialize_systems(&self, only: Option<&HashSet<String>>) -> Result<Vec<(String, TreeValue)>> {
        let mut out = Vec::new();
        for system in self.systems_snapshot() {
            let name = system.name().to_string();
            if only.is_some_and(|only| !only.contains(&name)) {
                continue;
            }
            let tree = system
                .serialize(&self.current_version)
                .ok_or_else(|| PersistenceError::Serialization {
                    context: format!("system '{name}'"),
                    reason: "the system produced no data".to_string(),
                })?;
            tracing::debug!(system = %name, bytes = tree.estimated_size(), "system serialized");
            out.push((name, tree));
        }
        Ok(out)
    }

    /// Returns the full system list for the document plus the subset that
    /// was freshly serialized, or `None` when nothing needs writing.
    #[allow(clippy::type_complexity)]
    fn collect_incremental(
        &self,
        path: &Path,
        tracker: &IncrementalSaveTracker,
        result: &mut SaveOperationResult,
    ) -> Result<Option<(Vec<(String, TreeValue)>, Vec<(String, TreeValue)>)>> {
        let strategy = tracker.determine_save_strategy();
        let existing = match self.read_current_document(path) {
            Ok(document) => Some(document),
            Err(reason) => {
                result.warn(format!("writing a full save: {reason}"));
                None
            }
        };

        let full = || -> Result<_> {
            let systems = self.serialize_systems(None)?;
            Ok(Some((systems.clone(), systems)))
        };
        let Some(existing) = existing else {
            return full();
        };
        if strategy == SaveStrategy::Full {
            tracing::debug!("most tracked data is dirty, writing a full save");
            return full();
        }

        let stored = format::document_systems(&existing);
        let dirty: HashSet<String> = DirtySystemFilter::systems_to_save(tracker)
            .into_iter()
            .collect();
        let to_serialize: HashSet<String> = self
            .system_names()
            .into_iter()
            .filter(|name| {
                dirty.contains(name)
                    || tracker.state(name).is_none()
                    || !stored.iter().any(|(stored_name, _)| stored_name == name)
            })
            .collect();

        if to_serialize.is_empty() {
            return Ok(None);
        }

        let fresh = self.serialize_systems(Some(&to_serialize))?;
        let mut systems = Vec::with_capacity(stored.len() + fresh.len());
        for name in self.system_names() {
            if to_serialize.contains(&name) {
                if let Some(index) = fresh.iter().position(|(n, _)| *n == name) {
                    systems.push(fresh[index].clone());
                }
            } else if let Some((_, tree)) = stored.iter().find(|(n, _)| *n == name) {
                systems.push((name.clone(), tree.clone()));
                result.systems_reused.push(name);
            }
        }
        tracing::debug!(
            serialized = fresh.len(),
            reused = result.systems_reused.len(),
            ?strategy,
            "incremental save planned"
        );
        Ok(Some((systems, fresh)))
    }

    /// The existing save at `path`, if it decodes and is at the current version.
    fn read_current_document(&self, path: &Path) -> std::result::Result<TreeValue, String> {
        if !path.exists() {
            return Err("no previous save exists".to_string());
        }
        let bytes = io::read_file(path).map_err(|e| e.to_string())?;
        let decoded = format::decode_save(path, &bytes, &self.engine, &self.canonical)
            .map_err(|e| format!("previous save is unusable ({e})"))?;
        if decoded.version != self.current_version {
            return Err(format!(
                "previous save is version {}, current is {}",
                decoded.version, self.current_version
            ));
        }
        Ok(decoded.document)
    }

    /// Encode, compress and write a sealed document, then rotate backups.
    pub(super) fn write_document(
        &self,
        op: &OperationHandle<'_>,
        result: &mut SaveOperationResult,
        path: &Path,
        sealed: SealedDocument,
    ) -> Result<()> {
        let encoded = format::encode_document(&sealed.document, &self.canonical, path)?;
        result.uncompressed_size = encoded.len() as u64;
        result.content_digest = Some(sealed.content_digest);

        op.checkpoint(OperationStage::Compressing)?;
        let (frame, stats) = self.engine.compress(&encoded)?;
        result.algorithm = Some(frame.algorithm);
        tracing::debug!(
            algorithm = %stats.algorithm,
            original = stats.original_size,
            compressed = stats.compressed_size,
            ratio = stats.ratio(),
            "document compressed"
        );

        let mut bytes = frame.to_bytes();
        self.inject_write_faults(path, &mut bytes)?;
        op.checkpoint(OperationStage::Writing)?;
        self.write_bytes(path, &bytes, result)?;

        result.bytes_written = bytes.len() as u64;
        result.file_digest = Some(checksum::digest(&bytes));
        result.disk_state = DiskState::Written;

        if op.checkpoint(OperationStage::Finalizing).is_err() {
            result.warn("cancelled after the file was written; backup rotation skipped");
            result.succeed(format!("saved to {} before cancellation", path.display()));
            return Ok(());
        }

        if self.config.auto_backup
            && let Err(e) = self.recovery.cleanup_old_backups(path, self.config.max_backups)
        {
            result.warn(format!("backup rotation failed: {e}"));
        }
        Ok(())
    }

    /// Put `bytes` at `path`, atomically when configured. Backs up the
    /// previous file first when auto-backup is on.
    fn write_bytes(&self, path: &Path, bytes: &[u8], result: &mut SaveOperationResult) -> Result<()> {
        let existed = path.is_file();
        let want_backup = self.config.auto_backup && existed;

        if self.config.atomic_writes {
            result.atomic_write_used = true;
            let mut backup = None;
            let mut backup_error = None;
            io::write_atomic(path, bytes, |staged| {
                self.before_rename(staged)?;
                if want_backup {
                    match io::create_backup(path) {
                        Ok(created) => backup = Some(created),
                        Err(e) => backup_error = Some(e),
                    }
                }
                Ok(())
            })?;
            if let Some(e) = backup_error {
                result.warn(format!("could not back up the previous save: {e}"));
            }
            result.backup_created = backup.is_some();
            result.backup_path = backup;
            return Ok(());
        }

        if want_backup {
            match io::create_backup(path) {
                Ok(created) => {
                    result.backup_created = true;
                    result.backup_path = Some(created);
                }
                Err(e) => result.warn(format!("could not back up the previous save: {e}")),
            }
        }
        io::write_direct(path, bytes).inspect_err(|_| {
            result.disk_state = if result.backup_created {
                DiskState::BackupAvailable
            } else if existed || path.exists() {
                DiskState::DataLossRisk
            } else {
                DiskState::Unchanged
            };
        })
    }

    fn before_rename(&self, staged: &StagedFile) -> Result<()> {
        #[cfg(any(test, feature = "chaos"))]
        self.faults.check_before_rename(staged)?;
        #[cfg(not(any(test, feature = "chaos")))]
        let _ = staged;
        Ok(())
    }

    fn inject_write_faults(&self, path: &Path, bytes: &mut Vec<u8>) -> Result<()> {
        #[cfg(any(test, feature = "chaos"))]
        {
            self.faults.apply_latency();
            self.faults.check_disk_full(path)?;
            self.faults.mangle(bytes);
        }
        #[cfg(not(any(test, feature = "chaos")))]
        let _ = (path, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::autosave::{DirtyFlag, IncrementalSaveConfig, IncrementalSaveTracker};
    use crate::error::ErrorKind;
    use crate::orchestrator::DiskState;
    use crate::tree::TreeValue;
    use tempfile::tempdir;

    #[test]
    fn test_save_writes_frame_and_reports() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.register_system(MemorySystem::new(
            "realm",
            TreeValue::object().with("name", "Aster").with("turn", 12),
        ));

        let result = orchestrator.save_game("slot1");
        assert!(result.is_success(), "{result}");
        assert!(result.atomic_write_used);
        assert!(!result.backup_created);
        assert_eq!(result.disk_state, DiskState::Written);
        assert_eq!(result.systems, vec!["realm"]);
        let path = result.path.clone().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), result.bytes_written);
        assert_eq!(
            crate::checksum::compute_file_digest(&path).unwrap(),
            result.file_digest.unwrap()
        );
    }

    #[test]
    fn test_second_save_creates_backup() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.register_system(MemorySystem::new("realm", TreeValue::object()));
        assert!(orchestrator.save_game("slot1").is_success());
        let second = orchestrator.save_game("slot1");
        assert!(second.backup_created);
        assert!(second.backup_path.unwrap().exists());
        assert_eq!(orchestrator.list_backups("slot1").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_filename_fails_without_touching_disk() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let result = orchestrator.save_game("../escape");
        assert_eq!(result.error_kind, Some(ErrorKind::PathTraversal));
        assert_eq!(result.disk_state, DiskState::Unchanged);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_failure_before_rename_keeps_original() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let system = MemorySystem::new("realm", TreeValue::object().with("turn", 1));
        orchestrator.register_system(system.clone());
        let first = orchestrator.save_game("slot1");
        let path = first.path.unwrap();
        let before = std::fs::read(&path).unwrap();

        system.set(TreeValue::object().with("turn", 2));
        orchestrator.fault_injector().fail_before_rename(true);
        let result = orchestrator.save_game("slot1");

        assert!(!result.is_success());
        assert_eq!(result.disk_state, DiskState::Unchanged);
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(orchestrator.recovery().find_incomplete_operations().unwrap().is_empty());
    }

    #[test]
    fn test_disk_full_is_reported() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        orchestrator.fault_injector().simulate_disk_full(true);
        let result = orchestrator.save_game("slot1");
        assert_eq!(result.error_kind, Some(ErrorKind::InsufficientSpace));
        assert!(result.suggestion.is_some());
    }

    #[test]
    fn test_incremental_reuses_clean_systems() {
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let realm = MemorySystem::new("realm", TreeValue::object().with("turn", 1));
        let economy = MemorySystem::new("economy", TreeValue::object().with("gold", 5));
        let culture = MemorySystem::new("culture", TreeValue::object().with("arts", 2));
        orchestrator.register_system(realm.clone());
        orchestrator.register_system(economy.clone());
        orchestrator.register_system(culture.clone());

        let tracker = IncrementalSaveTracker::new(IncrementalSaveConfig::default());
        for name in ["realm", "economy", "culture"] {
            tracker.register_system(name, 100);
        }
        let first = orchestrator.save_incremental("slot1", &tracker);
        assert!(first.is_success(), "{first}");
        assert_eq!(first.systems.len(), 3);

        realm.set(TreeValue::object().with("turn", 2));
        tracker.mark_dirty("realm", DirtyFlag::Dirty);
        let second = orchestrator.save_incremental("slot1", &tracker);
        assert!(second.is_success(), "{second}");
        assert_eq!(second.systems, vec!["realm"]);
        assert_eq!(second.systems_reused.len(), 2);
        assert!(!tracker.is_dirty("realm"));

        let third = orchestrator.save_incremental("slot1", &tracker);
        assert!(third.is_success());
        assert_eq!(third.bytes_written, 0);

        let loaded = orchestrator.load_game("slot1");
        assert!(loaded.is_success(), "{loaded}");
        assert_eq!(
            realm.last_restored().unwrap(),
            TreeValue::object().with("turn", 2)
        );
        assert_eq!(
            economy.last_restored().unwrap(),
            TreeValue::object().with("gold", 5)
        );
    }
}
