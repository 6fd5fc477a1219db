//! Save schema versions.
//!
//! Versions are written into every save document header as `major.minor.patch`
//! with an optional `-build` suffix (e.g. "1.2.0", "1.2.0-a1b2c3"). The build
//! hash is informational: ordering and equality only look at the numeric part.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a version string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid save version '{0}' (expected major.minor.patch[-build])")]
pub struct VersionParseError(pub String);

/// Schema version of a save document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaveVersion {
    /// Major version number. Different majors are incompatible.
    pub major: u32,
    /// Minor version number.
    pub minor: u32,
    /// Patch version number.
    pub patch: u32,
    /// Optional build identifier.
    pub build_hash: String,
}

impl SaveVersion {
    /// Create a version without a build hash.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build_hash: String::new(),
        }
    }

    /// Attach a build identifier.
    #[must_use]
    pub fn with_build_hash(mut self, build_hash: impl Into<String>) -> Self {
        self.build_hash = build_hash.into();
        self
    }

    /// Two versions are compatible when their major numbers match.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major
    }

    /// Packed integer form, `major * 10000 + minor * 100 + patch`.
    #[must_use]
    pub fn to_int(&self) -> u64 {
        u64::from(self.major) * 10_000 + u64::from(self.minor) * 100 + u64::from(self.patch)
    }

    /// Numeric identity used for ordering, equality and hashing.
    #[must_use]
    pub const fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for SaveVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SaveVersion {}

impl Hash for SaveVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for SaveVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SaveVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl FromStr for SaveVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError(s.to_string());

        let (numbers, build_hash) = match s.split_once('-') {
            Some((numbers, build)) => {
                let valid_build = !build.is_empty()
                    && build
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
                if !valid_build {
                    return Err(invalid());
                }
                (numbers, build.to_string())
            }
            None => (s, String::new()),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut parsed = [0u32; 3];
        for (slot, part) in parsed.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self {
            major: parsed[0],
            minor: parsed[1],
            patch: parsed[2],
            build_hash,
        })
    }
}

impl TryFrom<String> for SaveVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SaveVersion> for String {
    fn from(version: SaveVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SaveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.build_hash.is_empty() {
            write!(f, "-{}", self.build_hash)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let v: SaveVersion = "1.2.3".parse().unwrap();
        assert_eq!(v.key(), (1, 2, 3));
        assert!(v.build_hash.is_empty());
    }

    #[test]
    fn test_parse_with_build_hash() {
        let v: SaveVersion = "2.0.1-abc_12-x".parse().unwrap();
        assert_eq!(v.key(), (2, 0, 1));
        assert_eq!(v.build_hash, "abc_12-x");
        assert_eq!(v.to_string(), "2.0.1-abc_12-x");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "1.2", "1.2.3.4", "a.b.c", "1.2.3-", "1.2.3-bad!", " 1.2.3", "1..3"] {
            assert!(bad.parse::<SaveVersion>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_ordering_ignores_build_hash() {
        let a = SaveVersion::new(1, 2, 0).with_build_hash("x");
        let b = SaveVersion::new(1, 2, 0).with_build_hash("y");
        assert_eq!(a, b);
        assert!(SaveVersion::new(1, 10, 0) > SaveVersion::new(1, 9, 9));
        assert!(SaveVersion::new(0, 9, 9) < SaveVersion::new(1, 0, 0));
    }

    #[test]
    fn test_compatibility_by_major() {
        assert!(SaveVersion::new(1, 0, 0).is_compatible_with(&SaveVersion::new(1, 5, 2)));
        assert!(!SaveVersion::new(1, 0, 0).is_compatible_with(&SaveVersion::new(2, 0, 0)));
    }

    #[test]
    fn test_to_int() {
        assert_eq!(SaveVersion::new(1, 2, 3).to_int(), 10_203);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&SaveVersion::new(1, 1, 0)).unwrap();
        assert_eq!(json, "\"1.1.0\"");
        let back: SaveVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SaveVersion::new(1, 1, 0));
    }
}
