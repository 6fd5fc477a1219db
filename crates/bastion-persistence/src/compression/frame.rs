//! Binary frame around a stored payload.
//!
//! ```text
//! offset size field
//! 0      4    magic "BSAV"
//! 4      2    format version (u16 LE)
//! 6      2    algorithm id (u16 LE)
//! 8      8    original size (u64 LE)
//! 16     8    compressed size (u64 LE)
//! 24     4    CRC32 of the payload as stored (u32 LE)
//! 28     4    reserved, zero
//! 32     ..   payload
//! ```

use crate::checksum::crc32;

use super::{CompressionAlgorithm, CompressionError};

/// File identification bytes.
pub const MAGIC_BYTES: [u8; 4] = *b"BSAV";

/// Current frame layout version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed header.
pub const HEADER_LEN: usize = 32;

/// Largest payload a frame may declare, before or after compression.
pub const MAX_ORIGINAL_SIZE: u64 = 1 << 30;

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub format_version: u16,
    pub algorithm: CompressionAlgorithm,
    pub original_size: u64,
    pub compressed_size: u64,
    pub checksum: u32,
    pub reserved: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC_BYTES);
        out[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        out[6..8].copy_from_slice(&self.algorithm.id().to_le_bytes());
        out[8..16].copy_from_slice(&self.original_size.to_le_bytes());
        out[16..24].copy_from_slice(&self.compressed_size.to_le_bytes());
        out[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        out[28..32].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    /// Parse the header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, CompressionError> {
        if bytes.len() < HEADER_LEN {
            return Err(CompressionError::Truncated {
                required: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC_BYTES {
            return Err(CompressionError::BadMagic { found: magic });
        }

        let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_version == 0 || format_version > FORMAT_VERSION {
            return Err(CompressionError::UnsupportedFormat {
                found: format_version,
                supported: FORMAT_VERSION,
            });
        }

        let algorithm_id = u16::from_le_bytes([bytes[6], bytes[7]]);
        let algorithm = CompressionAlgorithm::from_id(algorithm_id)
            .ok_or(CompressionError::UnknownAlgorithm(algorithm_id))?;

        let header = Self {
            format_version,
            algorithm,
            original_size: read_u64(&bytes[8..16]),
            compressed_size: read_u64(&bytes[16..24]),
            checksum: read_u32(&bytes[24..28]),
            reserved: read_u32(&bytes[28..32]),
        };
        header.check_fields()?;
        Ok(header)
    }

    /// Size and reserved fields are not covered by the payload CRC, so bound
    /// them before anything sizes a buffer from them.
    fn check_fields(&self) -> Result<(), CompressionError> {
        let invalid = |reason: String| Err(CompressionError::InvalidHeader { reason });
        if self.reserved != 0 {
            return invalid(format!("reserved field is {:#010x}", self.reserved));
        }
        if self.original_size > MAX_ORIGINAL_SIZE || self.compressed_size > MAX_ORIGINAL_SIZE {
            return invalid(format!(
                "declared sizes {}/{} exceed the {MAX_ORIGINAL_SIZE} byte limit",
                self.original_size, self.compressed_size
            ));
        }
        if self.algorithm == CompressionAlgorithm::None
            && self.original_size != self.compressed_size
        {
            return invalid(format!(
                "uncompressed frame declares {} bytes but stores {}",
                self.original_size, self.compressed_size
            ));
        }
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

/// A payload plus the metadata needed to verify and decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedData {
    pub algorithm: CompressionAlgorithm,
    pub original_size: u64,
    pub compressed_size: u64,
    /// CRC32 of `payload` exactly as stored.
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl CompressedData {
    /// Wrap an encoded payload, computing its size and checksum.
    pub fn new(algorithm: CompressionAlgorithm, original_size: usize, payload: Vec<u8>) -> Self {
        Self {
            algorithm,
            original_size: original_size as u64,
            compressed_size: payload.len() as u64,
            checksum: crc32(&payload),
            payload,
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            format_version: FORMAT_VERSION,
            algorithm: self.algorithm,
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            checksum: self.checksum,
            reserved: 0,
        }
    }

    /// Header followed by payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header().to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a full frame and verify the payload CRC before anything decodes it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CompressionError> {
        let header = FrameHeader::parse(bytes)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() as u64 != header.compressed_size {
            return Err(CompressionError::LengthMismatch {
                declared: header.compressed_size,
                actual: payload.len() as u64,
            });
        }
        let frame = Self {
            algorithm: header.algorithm,
            original_size: header.original_size,
            compressed_size: header.compressed_size,
            checksum: header.checksum,
            payload: payload.to_vec(),
        };
        frame.verify_checksum()?;
        Ok(frame)
    }

    pub fn verify_checksum(&self) -> Result<(), CompressionError> {
        let computed = crc32(&self.payload);
        if computed == self.checksum {
            Ok(())
        } else {
            Err(CompressionError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            })
        }
    }

    /// Compressed size as a fraction of the original (1.0 for empty input).
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }
}
