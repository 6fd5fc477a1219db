//! Neutral tree value exchanged with persistent systems.
//!
//! Systems hand the engine a [`TreeValue`] and receive one back on load; the
//! engine never interprets the fields. Objects keep insertion order so a
//! system's output is passed through untouched, while canonical encoding
//! sorts keys (see [`crate::canonical`]). Equality treats objects as
//! unordered maps.

use std::hash::{DefaultHasher, Hasher};

use crate::checksum::Fnv1aHasher;

/// A JSON-like value tree.
#[derive(Debug, Clone, Default)]
pub enum TreeValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<TreeValue>),
    Object(Vec<(String, TreeValue)>),
}

/// Identity of a raw tree: two independent 64-bit hashes over its
/// structure in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeIdentity {
    pub fnv: u64,
    pub sip: u64,
}

/// A float that JSON cannot represent (NaN or infinite).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("non-finite number {value} at {path}")]
pub struct NonFiniteNumber {
    pub path: String,
    pub value: f64,
}

impl TreeValue {
    /// An empty object.
    #[must_use]
    pub const fn object() -> Self {
        Self::Object(Vec::new())
    }

    /// An empty array.
    #[must_use]
    pub const fn array() -> Self {
        Self::Array(Vec::new())
    }

    /// Builder-style insert for objects.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TreeValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace `key`. Non-object values are turned into an object first.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TreeValue>) -> Option<TreeValue> {
        let key = key.into();
        let value = value.into();
        if !self.is_object() {
            *self = Self::object();
        }
        let Self::Object(entries) = self else {
            return None;
        };
        if let Some((_, slot)) = entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(slot, value));
        }
        entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<TreeValue> {
        let Self::Object(entries) = self else {
            return None;
        };
        let index = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    }

    pub fn get(&self, key: &str) -> Option<&TreeValue> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut TreeValue> {
        match self {
            Self::Object(entries) => entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn as_object(&self) -> Option<&[(String, TreeValue)]> {
        match self {
            Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[TreeValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Short type name used in validation messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Rough encoded size in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Null => 4,
            Self::Bool(_) => 5,
            Self::Integer(_) | Self::Float(_) => 8,
            Self::String(s) => s.len() + 2,
            Self::Array(items) => 2 + items.iter().map(|v| v.estimated_size() + 1).sum::<usize>(),
            Self::Object(entries) => {
                2 + entries
                    .iter()
                    .map(|(k, v)| k.len() + 4 + v.estimated_size())
                    .sum::<usize>()
            }
        }
    }

    /// Hash of the raw structure, sensitive to object key order.
    pub fn identity(&self) -> TreeIdentity {
        let mut fnv = Fnv1aHasher::default();
        let mut sip = DefaultHasher::new();
        self.hash_into(&mut fnv);
        self.hash_into(&mut sip);
        TreeIdentity {
            fnv: fnv.finish(),
            sip: sip.finish(),
        }
    }

    /// Feed the structure into any hasher.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Bool(b) => {
                state.write_u8(1);
                state.write_u8(u8::from(*b));
            }
            Self::Integer(n) => {
                state.write_u8(2);
                state.write_i64(*n);
            }
            Self::Float(n) => {
                state.write_u8(3);
                state.write_u64(n.to_bits());
            }
            Self::String(s) => {
                state.write_u8(4);
                state.write_usize(s.len());
                state.write(s.as_bytes());
            }
            Self::Array(items) => {
                state.write_u8(5);
                state.write_usize(items.len());
                for item in items {
                    item.hash_into(state);
                }
            }
            Self::Object(entries) => {
                state.write_u8(6);
                state.write_usize(entries.len());
                for (key, value) in entries {
                    state.write_usize(key.len());
                    state.write(key.as_bytes());
                    value.hash_into(state);
                }
            }
        }
    }

    /// Convert to a `serde_json::Value`. Object keys end up sorted.
    pub fn to_json(&self) -> Result<serde_json::Value, NonFiniteNumber> {
        self.to_json_at("$")
    }

    fn to_json_at(&self, path: &str) -> Result<serde_json::Value, NonFiniteNumber> {
        use serde_json::Value;
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(n) => Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| NonFiniteNumber {
                    path: path.to_string(),
                    value: *n,
                })?,
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item.to_json_at(&format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json_at(&format!("{path}.{key}"))?);
                }
                Value::Object(map)
            }
        })
    }
}

impl PartialEq for TreeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| other.get(key).is_some_and(|v| v == value))
            }
            _ => false,
        }
    }
}

impl From<serde_json::Value> for TreeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                // u64 beyond i64::MAX degrades to a float.
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for TreeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TreeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for TreeValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for TreeValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for TreeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for TreeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for TreeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<TreeValue>> for TreeValue {
    fn from(value: Vec<TreeValue>) -> Self {
        Self::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut tree = TreeValue::object().with("a", 1).with("b", 2);
        let old = tree.insert("a", 10);
        assert_eq!(old, Some(TreeValue::Integer(1)));
        assert_eq!(tree.as_object().unwrap().len(), 2);
        assert_eq!(tree.get("a").and_then(TreeValue::as_i64), Some(10));
    }

    #[test]
    fn test_equality_ignores_key_order() {
        let a = TreeValue::object().with("x", 1).with("y", "two");
        let b = TreeValue::object().with("y", "two").with("x", 1);
        assert_eq!(a, b);
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_array_order_matters() {
        let a = TreeValue::from(vec![TreeValue::from(1), TreeValue::from(2)]);
        let b = TreeValue::from(vec![TreeValue::from(2), TreeValue::from(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_round_trip() {
        let tree = TreeValue::object()
            .with("name", "Aurelia")
            .with("gold", 1500)
            .with("ratio", 0.25)
            .with("flags", vec![TreeValue::Bool(true), TreeValue::Null]);
        let json = tree.to_json().unwrap();
        assert_eq!(TreeValue::from(json), tree);
    }

    #[test]
    fn test_non_finite_float_reports_path() {
        let tree = TreeValue::object().with("stats", TreeValue::object().with("x", f64::NAN));
        let err = tree.to_json().unwrap_err();
        assert_eq!(err.path, "$.stats.x");
    }

    #[test]
    fn test_remove() {
        let mut tree = TreeValue::object().with("keep", 1).with("drop", 2);
        assert!(tree.remove("drop").is_some());
        assert!(!tree.contains_key("drop"));
        assert!(tree.remove("missing").is_none());
    }
}
