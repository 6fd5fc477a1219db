//! Save/load coordination.
//!
//! [`SaveOrchestrator`] wires path resolution, admission control,
//! canonicalization, compression, atomic writes, migration, validation and
//! recovery into the operations applications call. Every save and load
//! returns a [`SaveOperationResult`]; lower-level queries return
//! [`crate::Result`].

mod files;
mod load;
mod operations;
mod result;
mod save;
mod stats;
mod tasks;
mod verify;

pub use files::SaveFileInfo;
pub use operations::{
    ActiveOperation, ActiveOperationInfo, EVENT_LOG_CAPACITY, OperationEvent, OperationProgress,
    OperationStage,
};
pub use result::{DiskState, Outcome, SaveOperationResult};
pub use stats::{SaveStats, StatisticsSnapshot, ValidationCacheStats};
pub use verify::{VerificationReport, VerifyOptions};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::canonical::CanonicalSerializer;
use crate::compression::CompressionEngine;
use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use crate::gate::{ConcurrencyGate, OperationKind};
use crate::migration::MigrationEngine;
use crate::io;
use crate::path::{PathError, PathResolver};
use crate::recovery::CrashRecoveryManager;
use crate::system::PersistentSystem;
use crate::validation::{
    STRUCTURE_VALIDATOR, SYSTEMS_VALIDATOR, SaveValidator, StructureValidator, SystemsValidator,
};
use crate::version::SaveVersion;

use operations::{OperationHandle, OperationTable};
use verify::ValidationCache;

type NamedValidator = (String, Arc<dyn SaveValidator>);

/// Top-level persistence coordinator.
pub struct SaveOrchestrator {
    config: PersistenceConfig,
    current_version: SaveVersion,
    resolver: PathResolver,
    engine: Arc<CompressionEngine>,
    canonical: CanonicalSerializer,
    migrations: MigrationEngine,
    gate: ConcurrencyGate,
    recovery: CrashRecoveryManager,
    systems: RwLock<Vec<Arc<dyn PersistentSystem>>>,
    validators: RwLock<Vec<NamedValidator>>,
    validation_cache: ValidationCache,
    operations: OperationTable,
    #[cfg(any(test, feature = "chaos"))]
    faults: crate::chaos::FaultInjector,
}

impl SaveOrchestrator {
    /// Create the save directory if needed and set up every component.
    ///
    /// `current_version` is stamped on new saves; older saves are migrated
    /// up to it on load.
    pub fn new(config: PersistenceConfig, current_version: SaveVersion) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.save_dir)
            .map_err(|e| PersistenceError::io("create", &config.save_dir, e))?;
        let resolver = PathResolver::new(&config.save_dir).map_err(|e| {
            PersistenceError::from_path_error(&config.save_dir.to_string_lossy(), e)
        })?;

        let engine = Arc::new(CompressionEngine::new(config.compression.clone()));
        let recovery = CrashRecoveryManager::new(resolver.base_dir(), Arc::clone(&engine));
        let structure: Arc<dyn SaveValidator> = Arc::new(StructureValidator);
        let systems: Arc<dyn SaveValidator> = Arc::new(SystemsValidator);
        let validators = vec![
            (STRUCTURE_VALIDATOR.to_string(), structure),
            (SYSTEMS_VALIDATOR.to_string(), systems),
        ];

        tracing::info!(
            save_dir = %resolver.base_dir().display(),
            version = %current_version,
            algorithm = %config.compression.algorithm,
            atomic_writes = config.atomic_writes,
            "persistence initialized"
        );

        Ok(Self {
            canonical: CanonicalSerializer::new(config.canonical_cache_size),
            gate: ConcurrencyGate::new(config.max_concurrent_saves, config.max_concurrent_loads),
            validation_cache: ValidationCache::new(
                config.validation_caching,
                config.validation_cache_size,
            ),
            migrations: MigrationEngine::new(),
            systems: RwLock::new(Vec::new()),
            validators: RwLock::new(validators),
            operations: OperationTable::default(),
            #[cfg(any(test, feature = "chaos"))]
            faults: crate::chaos::FaultInjector::new(),
            current_version,
            resolver,
            engine,
            recovery,
            config,
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn current_version(&self) -> &SaveVersion {
        &self.current_version
    }

    /// Canonicalized save directory.
    pub fn save_dir(&self) -> &Path {
        self.resolver.base_dir()
    }

    /// Register migrations here before loading older saves.
    pub fn migrations(&self) -> &MigrationEngine {
        &self.migrations
    }

    pub fn compression(&self) -> &CompressionEngine {
        &self.engine
    }

    pub fn recovery(&self) -> &CrashRecoveryManager {
        &self.recovery
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Switchable faults for exercising failure paths.
    #[cfg(any(test, feature = "chaos"))]
    pub fn fault_injector(&self) -> &crate::chaos::FaultInjector {
        &self.faults
    }

    /// Add a system, replacing any registered under the same name.
    pub fn register_system(
        &self,
        system: Arc<dyn PersistentSystem>,
    ) -> Option<Arc<dyn PersistentSystem>> {
        let name = system.name().to_string();
        let previous = {
            let mut systems = self.systems_mut();
            match systems.iter().position(|s| s.name() == name) {
                Some(index) => Some(std::mem::replace(&mut systems[index], system)),
                None => {
                    systems.push(system);
                    None
                }
            }
        };
        self.validation_cache.clear();
        tracing::debug!(system = %name, replaced = previous.is_some(), "system registered");
        previous
    }

    pub fn unregister_system(&self, name: &str) -> bool {
        let removed = {
            let mut systems = self.systems_mut();
            let before = systems.len();
            systems.retain(|s| s.name() != name);
            systems.len() != before
        };
        if removed {
            self.validation_cache.clear();
        }
        removed
    }

    /// Names of registered systems, in registration order.
    pub fn system_names(&self) -> Vec<String> {
        self.systems_ref()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Add a validator run on every load, replacing one with the same name.
    pub fn register_validator(&self, name: &str, validator: Arc<dyn SaveValidator>) {
        {
            let mut validators = self.validators.write().unwrap_or_else(PoisonError::into_inner);
            match validators.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = validator,
                None => validators.push((name.to_string(), validator)),
            }
        }
        self.validation_cache.clear();
    }

    pub fn unregister_validator(&self, name: &str) -> bool {
        let removed = {
            let mut validators = self.validators.write().unwrap_or_else(PoisonError::into_inner);
            let before = validators.len();
            validators.retain(|(n, _)| n != name);
            validators.len() != before
        };
        if removed {
            self.validation_cache.clear();
        }
        removed
    }

    pub fn validator_names(&self) -> Vec<String> {
        self.validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Request cooperative cancellation. Returns `false` for unknown ids.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        self.operations.cancel(operation_id)
    }

    /// Cancel and forget operations past the configured timeout.
    pub fn sweep_timeouts(&self) -> Vec<String> {
        self.operations.sweep_timeouts()
    }

    pub fn active_operations(&self) -> Vec<ActiveOperationInfo> {
        self.operations.active()
    }

    /// Newest first.
    pub fn recent_operations(&self, limit: usize) -> Vec<OperationEvent> {
        self.operations.recent(limit)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        StatisticsSnapshot::build(
            &self.operations.stats(),
            self.operations.active_count(None),
            self.canonical.stats(),
            self.validation_cache.stats(),
            self.engine.statistics(),
            self.gate.stats(),
            self.recovery.statistics(),
        )
    }

    pub fn reset_statistics(&self) {
        self.operations.reset_stats();
        self.engine.reset_statistics();
        self.recovery.reset_statistics();
        self.validation_cache.reset_counters();
    }

    /// Resolve a user-supplied filename inside the save directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        self.resolver
            .resolve(filename)
            .map_err(|e| PersistenceError::from_path_error(filename, e))
    }

    /// Resolve a name a save may be written to. Names shaped like backups,
    /// set-aside copies or temp files are refused.
    pub(crate) fn resolve_primary(&self, filename: &str) -> Result<PathBuf> {
        let path = self.resolve(filename)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if io::is_generated_name(&name) {
            return Err(PersistenceError::from_path_error(
                filename,
                PathError::GeneratedName { name },
            ));
        }
        Ok(path)
    }

    /// Run `body` as a tracked operation and fold its outcome into a result.
    fn execute<F>(&self, kind: OperationKind, filename: &str, body: F) -> SaveOperationResult
    where
        F: FnOnce(&OperationHandle<'_>, &mut SaveOperationResult) -> Result<()>,
    {
        let op = self
            .operations
            .begin(kind, filename, self.config.operation_timeout());
        let mut result = SaveOperationResult::begin(op.id().to_string(), kind, filename);
        let span = tracing::info_span!("persistence", operation_id = %op.id(), %kind, filename);
        let _entered = span.enter();
        let started = Instant::now();

        if let Err(error) = body(&op, &mut result) {
            tracing::warn!(
                error = %error,
                error_kind = %error.kind(),
                disk_state = %result.disk_state,
                "operation failed"
            );
            result.fail(&error);
        } else {
            tracing::info!(
                bytes_written = result.bytes_written,
                bytes_read = result.bytes_read,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "operation complete"
            );
        }
        op.finish(&mut result);
        result
    }

    fn systems_ref(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn PersistentSystem>>> {
        self.systems.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn systems_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn PersistentSystem>>> {
        self.systems.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered systems, cloned out so no lock is held across callbacks.
    fn systems_snapshot(&self) -> Vec<Arc<dyn PersistentSystem>> {
        self.systems_ref().clone()
    }

    fn validators_snapshot(&self) -> Vec<NamedValidator> {
        self.validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;
    use crate::tree::TreeValue;

    /// A system holding one tree, recording what it was restored from.
    pub(crate) struct MemorySystem {
        pub(crate) name: String,
        pub(crate) state: Mutex<TreeValue>,
        pub(crate) restored: Mutex<Vec<TreeValue>>,
        pub(crate) reject: bool,
    }

    impl MemorySystem {
        pub(crate) fn new(name: &str, state: TreeValue) -> Arc<Self> {
            Arc::new(Self::unwrapped(name, state))
        }

        pub(crate) fn unwrapped(name: &str, state: TreeValue) -> Self {
            Self {
                name: name.to_string(),
                state: Mutex::new(state),
                restored: Mutex::new(Vec::new()),
                reject: false,
            }
        }

        pub(crate) fn set(&self, state: TreeValue) {
            *self.state.lock().unwrap() = state;
        }

        pub(crate) fn last_restored(&self) -> Option<TreeValue> {
            self.restored.lock().unwrap().last().cloned()
        }
    }

    impl PersistentSystem for MemorySystem {
        fn name(&self) -> &str {
            &self.name
        }

        fn serialize(&self, _version: &SaveVersion) -> Option<TreeValue> {
            Some(self.state.lock().unwrap().clone())
        }

        fn deserialize(&self, data: &TreeValue, _version: &SaveVersion) -> bool {
            if self.reject {
                return false;
            }
            self.restored.lock().unwrap().push(data.clone());
            true
        }
    }

    pub(crate) fn orchestrator(dir: &Path) -> SaveOrchestrator {
        let config = PersistenceConfig {
            slot_timeout_ms: 200,
            ..PersistenceConfig::new(dir)
        };
        SaveOrchestrator::new(config, SaveVersion::new(1, 2, 0)).unwrap()
    }
}
