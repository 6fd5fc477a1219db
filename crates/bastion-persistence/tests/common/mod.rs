//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use bastion_persistence::{
    CompressionAlgorithm, CompressionConfig, PersistenceConfig, PersistentSystem,
    SaveOrchestrator, SaveVersion, TreeValue,
};

/// In-memory system whose state tests can swap and inspect.
pub struct Realm {
    name: String,
    state: Mutex<TreeValue>,
    restored: Mutex<Option<TreeValue>>,
}

impl Realm {
    pub fn new(name: &str, state: TreeValue) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(state),
            restored: Mutex::new(None),
        })
    }

    pub fn set(&self, state: TreeValue) {
        *self.state.lock().unwrap() = state;
    }

    pub fn restored(&self) -> Option<TreeValue> {
        self.restored.lock().unwrap().clone()
    }
}

impl PersistentSystem for Realm {
    fn name(&self) -> &str {
        &self.name
    }

    fn serialize(&self, _version: &SaveVersion) -> Option<TreeValue> {
        Some(self.state.lock().unwrap().clone())
    }

    fn deserialize(&self, data: &TreeValue, _version: &SaveVersion) -> bool {
        *self.restored.lock().unwrap() = Some(data.clone());
        true
    }

    fn estimated_size(&self) -> usize {
        self.state.lock().unwrap().estimated_size()
    }
}

pub fn kingdom() -> TreeValue {
    TreeValue::object()
        .with("name", "Aster")
        .with("turn", 42)
        .with("treasury", 1250.5)
        .with("at_war", false)
        .with(
            "provinces",
            TreeValue::Array(vec!["north".into(), "marsh".into(), "coast".into()]),
        )
}

/// Large enough, and repetitive enough, to be stored deflated.
pub fn chronicle() -> TreeValue {
    let entries = (0..200)
        .map(|turn| {
            TreeValue::object()
                .with("turn", turn)
                .with("event", "harvest festival in the marsh provinces")
        })
        .collect();
    kingdom().with("chronicle", TreeValue::Array(entries))
}

pub fn config(dir: &Path) -> PersistenceConfig {
    PersistenceConfig {
        slot_timeout_ms: 100,
        ..PersistenceConfig::new(dir)
    }
}

pub fn orchestrator_at(dir: &Path, version: SaveVersion) -> SaveOrchestrator {
    SaveOrchestrator::new(config(dir), version).expect("orchestrator should start")
}

/// Deflates every payload regardless of size.
pub fn deflating_orchestrator_at(dir: &Path, version: SaveVersion) -> SaveOrchestrator {
    let config = PersistenceConfig {
        compression: CompressionConfig {
            algorithm: CompressionAlgorithm::Fast,
            min_size_threshold: 0,
            ..CompressionConfig::default()
        },
        ..config(dir)
    };
    SaveOrchestrator::new(config, version).expect("orchestrator should start")
}
