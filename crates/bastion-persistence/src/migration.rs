//! Schema migrations between save versions.
//!
//! Registered migrations form a directed graph over versions. A path is the
//! shortest sequence of edges found by breadth-first search. Outgoing edges
//! of a version are explored in `(description, registration order)` order,
//! so which of several equal-length paths wins does not depend on which
//! module happened to register first.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};
use crate::tree::TreeValue;
use crate::version::SaveVersion;

/// In-place transform of a save document.
pub type MigrationFn = Arc<dyn Fn(&mut TreeValue) -> std::result::Result<(), String> + Send + Sync>;

/// One registered edge.
#[derive(Clone)]
pub struct SaveMigration {
    pub from: SaveVersion,
    pub to: SaveVersion,
    pub description: String,
    transform: MigrationFn,
    registration: usize,
}

impl SaveMigration {
    pub fn apply(&self, document: &mut TreeValue) -> std::result::Result<(), String> {
        (self.transform)(document)
    }
}

impl fmt::Debug for SaveMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveMigration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SaveMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.description)
    }
}

/// The step that stopped a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    /// Zero-based position in the path.
    pub index: usize,
    pub description: String,
    pub from: SaveVersion,
    pub to: SaveVersion,
    pub reason: String,
}

/// A successfully migrated document.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub document: TreeValue,
    /// `Display` form of each applied step, in order.
    pub steps: Vec<String>,
}

/// Owned registry of migrations.
#[derive(Default)]
pub struct MigrationEngine {
    migrations: RwLock<Vec<SaveMigration>>,
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration from `from` to `to`.
    pub fn register<F>(
        &self,
        from: SaveVersion,
        to: SaveVersion,
        description: impl Into<String>,
        transform: F,
    ) -> Result<()>
    where
        F: Fn(&mut TreeValue) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        if from == to {
            return Err(PersistenceError::MigrationFailed {
                from,
                to,
                failed_step: None,
                reason: "a migration must change the version".to_string(),
            });
        }
        let description = description.into();
        tracing::debug!(%from, %to, %description, "registered migration");

        let mut migrations = self
            .migrations
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let registration = migrations.len();
        migrations.push(SaveMigration {
            from,
            to,
            description,
            transform: Arc::new(transform),
            registration,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Shortest path from `from` to `to`; empty when they are equal.
    pub fn find_path(&self, from: &SaveVersion, to: &SaveVersion) -> Result<Vec<SaveMigration>> {
        if from == to {
            return Ok(Vec::new());
        }

        let migrations = self.read();
        let mut parents: HashMap<(u32, u32, u32), ((u32, u32, u32), usize)> = HashMap::new();
        let mut queue = VecDeque::from([from.key()]);
        let target = to.key();

        while let Some(node) = queue.pop_front() {
            let mut edges: Vec<(usize, &SaveMigration)> = migrations
                .iter()
                .enumerate()
                .filter(|(_, m)| m.from.key() == node)
                .collect();
            edges.sort_by(|(_, a), (_, b)| {
                a.description
                    .cmp(&b.description)
                    .then(a.registration.cmp(&b.registration))
            });

            for (index, edge) in edges {
                let next = edge.to.key();
                if next == from.key() || parents.contains_key(&next) {
                    continue;
                }
                parents.insert(next, (node, index));
                if next == target {
                    let mut path = Vec::new();
                    let mut cursor = target;
                    while let Some(&(parent, index)) = parents.get(&cursor) {
                        path.push(migrations[index].clone());
                        cursor = parent;
                    }
                    path.reverse();
                    return Ok(path);
                }
                queue.push_back(next);
            }
        }

        Err(PersistenceError::MigrationFailed {
            from: from.clone(),
            to: to.clone(),
            failed_step: None,
            reason: "no migration path is registered".to_string(),
        })
    }

    pub fn is_supported(&self, from: &SaveVersion, to: &SaveVersion) -> bool {
        self.find_path(from, to).is_ok()
    }

    /// Human-readable list of the steps a migration would run.
    pub fn preview(&self, from: &SaveVersion, to: &SaveVersion) -> Result<Vec<String>> {
        Ok(self
            .find_path(from, to)?
            .iter()
            .map(ToString::to_string)
            .collect())
    }

    /// Run `path` against a copy of `document`, stopping at the first failure.
    pub fn apply_path(&self, document: &TreeValue, path: &[SaveMigration]) -> Result<MigrationOutcome> {
        let mut working = document.clone();
        let mut steps = Vec::with_capacity(path.len());
        for (index, step) in path.iter().enumerate() {
            if let Err(reason) = step.apply(&mut working) {
                tracing::warn!(step = index, description = %step.description, %reason, "migration step failed");
                let (first, last) = (&path[0], &path[path.len() - 1]);
                return Err(PersistenceError::MigrationFailed {
                    from: first.from.clone(),
                    to: last.to.clone(),
                    failed_step: Some(FailedStep {
                        index,
                        description: step.description.clone(),
                        from: step.from.clone(),
                        to: step.to.clone(),
                        reason: reason.clone(),
                    }),
                    reason,
                });
            }
            steps.push(step.to_string());
        }
        Ok(MigrationOutcome {
            document: working,
            steps,
        })
    }

    /// Migrate a save document and stamp `header.version` with the target.
    pub fn migrate_document(
        &self,
        document: &TreeValue,
        from: &SaveVersion,
        to: &SaveVersion,
    ) -> Result<MigrationOutcome> {
        let path = self.find_path(from, to)?;
        tracing::info!(%from, %to, steps = path.len(), "migrating save document");
        let mut outcome = self.apply_path(document, &path)?;
        if let Some(header) = outcome.document.get_mut("header") {
            header.insert("version", to.to_string());
        }
        Ok(outcome)
    }

    /// Edges leaving `version`, as `(target, description)`.
    pub fn migrations_from(&self, version: &SaveVersion) -> Vec<(SaveVersion, String)> {
        self.read()
            .iter()
            .filter(|m| &m.from == version)
            .map(|m| (m.to.clone(), m.description.clone()))
            .collect()
    }

    /// Every version that appears as a source or target.
    pub fn registered_versions(&self) -> BTreeSet<SaveVersion> {
        self.read()
            .iter()
            .flat_map(|m| [m.from.clone(), m.to.clone()])
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<SaveMigration>> {
        self.migrations
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SaveVersion {
        s.parse().unwrap()
    }

    fn noop(_: &mut TreeValue) -> std::result::Result<(), String> {
        Ok(())
    }

    #[test]
    fn test_same_version_is_empty_path() {
        let engine = MigrationEngine::new();
        assert!(engine.find_path(&v("1.0.0"), &v("1.0.0")).unwrap().is_empty());
    }

    #[test]
    fn test_chain_is_found_in_order() {
        let engine = MigrationEngine::new();
        engine.register(v("1.1.0"), v("1.2.0"), "second", noop).unwrap();
        engine.register(v("1.0.0"), v("1.1.0"), "first", noop).unwrap();

        let path = engine.find_path(&v("1.0.0"), &v("1.2.0")).unwrap();
        let descriptions: Vec<_> = path.iter().map(|m| m.description.as_str()).collect();
        assert_eq!(descriptions, ["first", "second"]);
    }

    #[test]
    fn test_shortcut_beats_longer_chain() {
        let engine = MigrationEngine::new();
        engine.register(v("1.0.0"), v("1.1.0"), "a", noop).unwrap();
        engine.register(v("1.1.0"), v("1.2.0"), "b", noop).unwrap();
        engine.register(v("1.0.0"), v("1.2.0"), "direct", noop).unwrap();
        let path = engine.find_path(&v("1.0.0"), &v("1.2.0")).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].description, "direct");
    }

    #[test]
    fn test_tie_break_by_description_not_registration() {
        let engine = MigrationEngine::new();
        engine.register(v("1.0.0"), v("1.0.5"), "zeta route", noop).unwrap();
        engine.register(v("1.0.5"), v("1.2.0"), "zeta tail", noop).unwrap();
        engine.register(v("1.0.0"), v("1.1.0"), "alpha route", noop).unwrap();
        engine.register(v("1.1.0"), v("1.2.0"), "alpha tail", noop).unwrap();

        let path = engine.find_path(&v("1.0.0"), &v("1.2.0")).unwrap();
        assert_eq!(path[0].description, "alpha route");
    }

    #[test]
    fn test_missing_path_is_migration_failed() {
        let engine = MigrationEngine::new();
        engine.register(v("1.0.0"), v("1.1.0"), "x", noop).unwrap();
        let err = engine.find_path(&v("1.0.0"), &v("2.0.0")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MigrationFailed);
        assert!(!engine.is_supported(&v("1.1.0"), &v("1.0.0")));
    }

    #[test]
    fn test_cycles_terminate() {
        let engine = MigrationEngine::new();
        engine.register(v("1.0.0"), v("1.1.0"), "up", noop).unwrap();
        engine.register(v("1.1.0"), v("1.0.0"), "down", noop).unwrap();
        assert!(engine.find_path(&v("1.0.0"), &v("3.0.0")).is_err());
    }

    #[test]
    fn test_self_loop_rejected() {
        let engine = MigrationEngine::new();
        assert!(engine.register(v("1.0.0"), v("1.0.0"), "loop", noop).is_err());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_apply_reports_failed_step_and_leaves_input() {
        let engine = MigrationEngine::new();
        engine
            .register(v("1.0.0"), v("1.1.0"), "add field", |doc: &mut TreeValue| {
                doc.insert("added", true);
                Ok(())
            })
            .unwrap();
        engine
            .register(v("1.1.0"), v("1.2.0"), "explode", |_: &mut TreeValue| {
                Err("boom".to_string())
            })
            .unwrap();

        let original = TreeValue::object().with("n", 1);
        let path = engine.find_path(&v("1.0.0"), &v("1.2.0")).unwrap();
        let err = engine.apply_path(&original, &path).unwrap_err();
        match err {
            PersistenceError::MigrationFailed {
                failed_step: Some(step),
                ..
            } => {
                assert_eq!(step.index, 1);
                assert_eq!(step.description, "explode");
                assert_eq!(step.reason, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!original.contains_key("added"));
    }

    #[test]
    fn test_migrate_document_stamps_version() {
        let engine = MigrationEngine::new();
        engine
            .register(v("1.0.0"), v("1.1.0"), "rename gold", |doc: &mut TreeValue| {
                let gold = doc.remove("gold").ok_or("gold missing")?;
                doc.insert("treasury", gold);
                Ok(())
            })
            .unwrap();
        let doc = TreeValue::object()
            .with("header", TreeValue::object().with("version", "1.0.0"))
            .with("gold", 10);

        let outcome = engine.migrate_document(&doc, &v("1.0.0"), &v("1.1.0")).unwrap();
        assert_eq!(outcome.steps, ["1.0.0 -> 1.1.0: rename gold"]);
        assert_eq!(
            outcome.document.get("header").and_then(|h| h.get("version")),
            Some(&TreeValue::from("1.1.0"))
        );
        assert_eq!(outcome.document.get("treasury"), Some(&TreeValue::from(10)));
    }

    #[test]
    fn test_preview_and_introspection() {
        let engine = MigrationEngine::new();
        engine.register(v("1.0.0"), v("1.1.0"), "first", noop).unwrap();
        engine.register(v("1.1.0"), v("1.2.0"), "second", noop).unwrap();
        assert_eq!(
            engine.preview(&v("1.0.0"), &v("1.2.0")).unwrap(),
            ["1.0.0 -> 1.1.0: first", "1.1.0 -> 1.2.0: second"]
        );
        assert_eq!(engine.migrations_from(&v("1.0.0")).len(), 1);
        assert_eq!(engine.registered_versions().len(), 3);
    }
}
