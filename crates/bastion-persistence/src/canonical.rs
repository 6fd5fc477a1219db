//! Canonical, key-sorted encoding of tree values.
//!
//! Two trees that differ only in object key insertion order encode to the
//! same bytes, so checksums computed over the canonical form are stable.
//! Object keys are emitted in byte order by the encoder itself, whatever
//! order the underlying `serde_json` map keeps; arrays keep their order.
//!
//! Results are cached by the raw tree's [`TreeIdentity`] in a small LRU.
//! Every lookup, hit or miss, updates recency and counters, so the cache
//! sits behind a `Mutex`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::checksum::digest;
use crate::tree::{NonFiniteNumber, TreeIdentity, TreeValue};

/// Failure to produce or parse canonical text.
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error(transparent)]
    NonFinite(#[from] NonFiniteNumber),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct CacheEntry {
    bytes: Arc<[u8]>,
    last_used: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<TreeIdentity, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Canonical encoder with a bounded cache.
pub struct CanonicalSerializer {
    capacity: usize,
    state: Mutex<LruState>,
}

impl CanonicalSerializer {
    /// `capacity == 0` disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    /// Canonical bytes for `tree`, served from cache when possible.
    pub fn canonicalize(&self, tree: &TreeValue) -> Result<Arc<[u8]>, CanonicalError> {
        if self.capacity == 0 {
            return Ok(Arc::from(to_canonical_bytes(tree)?));
        }

        let key = tree.identity();
        {
            let mut state = self.lock();
            state.tick += 1;
            let tick = state.tick;
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.last_used = tick;
                let bytes = Arc::clone(&entry.bytes);
                state.hits += 1;
                return Ok(bytes);
            }
            state.misses += 1;
        }

        // Encode outside the lock; concurrent misses on the same tree both
        // encode and the second insert simply refreshes the entry.
        let bytes: Arc<[u8]> = Arc::from(to_canonical_bytes(tree)?);

        let mut state = self.lock();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.evictions += 1;
            }
        }
        let last_used = state.tick;
        state.entries.insert(
            key,
            CacheEntry {
                bytes: Arc::clone(&bytes),
                last_used,
            },
        );
        Ok(bytes)
    }

    /// SHA-256 hex of the canonical encoding.
    pub fn digest(&self, tree: &TreeValue) -> Result<String, CanonicalError> {
        Ok(digest(&self.canonicalize(tree)?))
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes a JSON value with object keys sorted.
struct SortedKeys<'a>(&'a Value);

impl Serialize for SortedKeys<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(SortedKeys)),
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
                serializer.collect_map(entries.into_iter().map(|(k, v)| (k, SortedKeys(v))))
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Uncached canonical encoding.
pub fn to_canonical_bytes(tree: &TreeValue) -> Result<Vec<u8>, CanonicalError> {
    Ok(serde_json::to_vec(&SortedKeys(&tree.to_json()?))?)
}

/// Parse canonical (or any JSON) text back into a tree.
pub fn parse_canonical(bytes: &[u8]) -> Result<TreeValue, CanonicalError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(TreeValue::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn army(order_flipped: bool) -> TreeValue {
        let unit = if order_flipped {
            TreeValue::object().with("strength", 900).with("morale", 0.75)
        } else {
            TreeValue::object().with("morale", 0.75).with("strength", 900)
        };
        TreeValue::object()
            .with("units", vec![unit])
            .with("general", "Agrippa")
    }

    #[test]
    fn test_keys_sorted_recursively() {
        let bytes = to_canonical_bytes(&army(false)).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"general":"Agrippa","units":[{"morale":0.75,"strength":900}]}"#
        );
    }

    #[test]
    fn test_keys_sorted_by_bytes() {
        let tree = TreeValue::object()
            .with("zeal", 1)
            .with("élan", 2)
            .with("Zeal", 3)
            .with("a", TreeValue::object().with("y", 1).with("X", 2).with("x", 3))
            .with("_", 4);
        let bytes = to_canonical_bytes(&tree).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"Zeal":3,"_":4,"a":{"X":2,"x":3,"y":1},"zeal":1,"élan":2}"#
        );
    }

    #[test]
    fn test_sorting_does_not_rely_on_map_order() {
        let mut map = serde_json::Map::new();
        map.insert("b".to_string(), Value::from(1));
        map.insert("a".to_string(), Value::Array(vec![Value::from("z"), Value::from("y")]));
        let bytes = serde_json::to_vec(&SortedKeys(&Value::Object(map))).unwrap();
        assert_eq!(bytes, br#"{"a":["z","y"],"b":1}"#);
    }

    #[test]
    fn test_insertion_order_does_not_change_output() {
        let serializer = CanonicalSerializer::new(8);
        let a = serializer.canonicalize(&army(false)).unwrap();
        let b = serializer.canonicalize(&army(true)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serializer.digest(&army(false)).unwrap(),
            serializer.digest(&army(true)).unwrap()
        );
    }

    #[test]
    fn test_cache_hits_and_misses() {
        let serializer = CanonicalSerializer::new(8);
        let tree = army(false);
        serializer.canonicalize(&tree).unwrap();
        serializer.canonicalize(&tree).unwrap();
        let stats = serializer.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction() {
        let serializer = CanonicalSerializer::new(2);
        let t1 = TreeValue::from(1);
        let t2 = TreeValue::from(2);
        let t3 = TreeValue::from(3);
        serializer.canonicalize(&t1).unwrap();
        serializer.canonicalize(&t2).unwrap();
        // touch t1 so t2 becomes the eviction candidate
        serializer.canonicalize(&t1).unwrap();
        serializer.canonicalize(&t3).unwrap();

        let stats = serializer.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);

        serializer.canonicalize(&t1).unwrap();
        assert_eq!(serializer.stats().hits, 2);
        serializer.canonicalize(&t2).unwrap();
        assert_eq!(serializer.stats().misses, 4);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let serializer = CanonicalSerializer::new(0);
        serializer.canonicalize(&army(false)).unwrap();
        serializer.canonicalize(&army(false)).unwrap();
        assert_eq!(serializer.stats(), CacheStats::default());
    }

    #[test]
    fn test_parse_round_trip() {
        let bytes = to_canonical_bytes(&army(true)).unwrap();
        assert_eq!(parse_canonical(&bytes).unwrap(), army(false));
        assert!(parse_canonical(b"{not json").is_err());
    }
}
