//! Checksums and content hashes.
//!
//! - CRC32 guards each stored payload block and is checked before decoding.
//! - SHA-256 (hex) identifies whole documents and files for audit tooling.
//! - FNV-1a gives the incremental tracker a cheap 64-bit change detector.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{PersistenceError, Result};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bytes sampled from each of the head, middle and tail in fast hash mode.
pub const SAMPLE_WINDOW: usize = 256;

/// CRC32 (IEEE) of a byte buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// SHA-256 of a byte buffer, lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute SHA-256 hash of a file.
///
/// Uses buffered reading for efficient processing of large files.
pub fn compute_file_digest(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| PersistenceError::io("read", path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| PersistenceError::io("read", path, e))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify that a file's digest matches the expected value.
pub fn verify_file_digest(path: &Path, expected: &str) -> Result<bool> {
    let actual = compute_file_digest(path)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// 64-bit FNV-1a as a [`Hasher`].
#[derive(Debug, Clone, Copy)]
pub struct Fnv1aHasher(u64);

impl Default for Fnv1aHasher {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Hasher for Fnv1aHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }
}

/// FNV-1a over the full buffer.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hasher = Fnv1aHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// FNV-1a over the head, middle and tail windows plus the length.
///
/// Buffers no larger than three windows are hashed in full.
pub fn sampled_hash_64(bytes: &[u8]) -> u64 {
    if bytes.len() <= SAMPLE_WINDOW * 3 {
        return fnv1a_64(bytes);
    }
    let mut hasher = Fnv1aHasher::default();
    let mid = bytes.len() / 2 - SAMPLE_WINDOW / 2;
    hasher.write(&bytes[..SAMPLE_WINDOW]);
    hasher.write(&bytes[mid..mid + SAMPLE_WINDOW]);
    hasher.write(&bytes[bytes.len() - SAMPLE_WINDOW..]);
    hasher.write_usize(bytes.len());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            digest(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_compute_file_digest_matches_buffer_digest() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Hello, World!").unwrap();
        temp_file.flush().unwrap();

        let hash = compute_file_digest(temp_file.path()).unwrap();
        assert_eq!(hash, digest(b"Hello, World!"));
        assert!(verify_file_digest(temp_file.path(), &hash.to_uppercase()).unwrap());
        assert!(!verify_file_digest(temp_file.path(), "wrong_hash").unwrap());
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_64(b""), FNV_OFFSET_BASIS);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_sampled_hash_small_buffers_hash_fully() {
        let data = vec![7u8; 500];
        assert_eq!(sampled_hash_64(&data), fnv1a_64(&data));
    }

    #[test]
    fn test_sampled_hash_sees_head_and_tail() {
        let base = vec![1u8; 4096];
        let mut head = base.clone();
        head[0] = 2;
        let mut tail = base.clone();
        tail[4095] = 2;
        let h = sampled_hash_64(&base);
        assert_ne!(h, sampled_hash_64(&head));
        assert_ne!(h, sampled_hash_64(&tail));
    }
}
