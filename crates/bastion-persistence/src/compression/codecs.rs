//! Codec implementations.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::{CompressionAlgorithm, CompressionError, Compressor};

/// Upfront buffer reservation for decoders; larger outputs grow on demand.
const PREALLOC_LIMIT: usize = 1 << 20;

/// Read at most `expected + 1` bytes so a lying header cannot make us
/// inflate an unbounded stream, then check the length.
fn read_exact_size<R: Read>(
    reader: R,
    algorithm: CompressionAlgorithm,
    expected_size: usize,
) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity(expected_size.min(PREALLOC_LIMIT));
    reader
        .take((expected_size as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::Decode {
            algorithm,
            reason: e.to_string(),
        })?;
    check_size(expected_size, out.len())?;
    Ok(out)
}

fn check_size(expected: usize, actual: usize) -> Result<(), CompressionError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CompressionError::SizeMismatch {
            expected: expected as u64,
            actual: actual as u64,
        })
    }
}

/// Stores bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCompressor;

impl Compressor for PassthroughCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn version(&self) -> String {
        "passthrough".to_string()
    }

    fn compress(&self, data: &[u8], _level: Option<i32>) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressionError> {
        check_size(expected_size, data.len())?;
        Ok(data.to_vec())
    }
}

/// Raw deflate via flate2, used for both the fast and high-ratio slots.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    algorithm: CompressionAlgorithm,
    default_level: u32,
}

impl DeflateCompressor {
    pub const fn fast() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Fast,
            default_level: 1,
        }
    }

    pub const fn high_ratio() -> Self {
        Self {
            algorithm: CompressionAlgorithm::HighRatio,
            default_level: 9,
        }
    }
}

impl Compressor for DeflateCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    fn version(&self) -> String {
        format!("deflate (flate2, level {})", self.default_level)
    }

    fn compress(&self, data: &[u8], level: Option<i32>) -> Result<Vec<u8>, CompressionError> {
        let level = level.map_or(self.default_level, |l| l.clamp(0, 9) as u32);
        let encode_err = |e: std::io::Error| CompressionError::Encode {
            algorithm: self.algorithm,
            reason: e.to_string(),
        };
        let mut encoder = DeflateEncoder::new(
            Vec::with_capacity(data.len() / 2 + 16),
            Compression::new(level),
        );
        encoder.write_all(data).map_err(encode_err)?;
        encoder.finish().map_err(encode_err)
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressionError> {
        read_exact_size(DeflateDecoder::new(data), self.algorithm, expected_size)
    }
}

/// zstd codec. Reports unavailable when built without the `zstd` feature.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    default_level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { default_level: 3 }
    }
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Balanced
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "zstd")
    }

    fn version(&self) -> String {
        format!("zstd (level {})", self.default_level)
    }

    #[cfg(feature = "zstd")]
    fn compress(&self, data: &[u8], level: Option<i32>) -> Result<Vec<u8>, CompressionError> {
        let level = level.map_or(self.default_level, |l| l.clamp(1, 19));
        zstd::encode_all(std::io::Cursor::new(data), level).map_err(|e| CompressionError::Encode {
            algorithm: CompressionAlgorithm::Balanced,
            reason: e.to_string(),
        })
    }

    #[cfg(not(feature = "zstd"))]
    fn compress(&self, _data: &[u8], _level: Option<i32>) -> Result<Vec<u8>, CompressionError> {
        Err(CompressionError::Unavailable {
            algorithm: CompressionAlgorithm::Balanced,
        })
    }

    #[cfg(feature = "zstd")]
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressionError> {
        let decoder =
            zstd::stream::read::Decoder::new(data).map_err(|e| CompressionError::Decode {
                algorithm: CompressionAlgorithm::Balanced,
                reason: e.to_string(),
            })?;
        read_exact_size(decoder, CompressionAlgorithm::Balanced, expected_size)
    }

    #[cfg(not(feature = "zstd"))]
    fn decompress(&self, _data: &[u8], _expected_size: usize) -> Result<Vec<u8>, CompressionError> {
        Err(CompressionError::Unavailable {
            algorithm: CompressionAlgorithm::Balanced,
        })
    }
}
