//! Payload compression and on-disk framing.
//!
//! Provides:
//! - `Compressor` - capability trait implemented by every codec
//! - `CompressionFactory` - owned registry of codecs with availability fallback
//! - `CompressionEngine` - size policy, per-call and cumulative statistics
//! - `CompressedData` / `FrameHeader` - the fixed 32-byte little-endian frame

mod codecs;
mod engine;
mod frame;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codecs::{DeflateCompressor, PassthroughCompressor, ZstdCompressor};
pub use engine::{
    CompressionEngine, CompressionFactory, CompressionStatistics, CompressionStats,
    estimate_entropy, is_likely_compressed,
};
pub use frame::{
    CompressedData, FORMAT_VERSION, FrameHeader, HEADER_LEN, MAGIC_BYTES, MAX_ORIGINAL_SIZE,
};

/// Payloads smaller than this are stored uncompressed by default.
pub const DEFAULT_MIN_SIZE_THRESHOLD: usize = 1024;

/// Compressed output must be below this fraction of the input to be kept.
pub const MIN_USEFUL_RATIO: f64 = 0.95;

/// Compression algorithm stored in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    /// Stored as-is.
    None,
    /// Deflate at its fastest level.
    Fast,
    /// Deflate at its best level.
    HighRatio,
    /// zstd at a middle level.
    Balanced,
}

impl CompressionAlgorithm {
    pub const ALL: [Self; 4] = [Self::None, Self::Fast, Self::HighRatio, Self::Balanced];

    /// Identifier written into the frame header.
    pub const fn id(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::HighRatio => 2,
            Self::Balanced => 3,
        }
    }

    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Fast),
            2 => Some(Self::HighRatio),
            3 => Some(Self::Balanced),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fast => "fast",
            Self::HighRatio => "high_ratio",
            Self::Balanced => "balanced",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Preferred algorithm; falls back to `None` when unavailable.
    pub algorithm: CompressionAlgorithm,

    /// Codec level override. `None` uses the codec's own default.
    pub level: Option<i32>,

    /// Payloads below this many bytes bypass compression.
    pub min_size_threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Fast,
            level: None,
            min_size_threshold: DEFAULT_MIN_SIZE_THRESHOLD,
        }
    }
}

impl CompressionConfig {
    /// Store every payload uncompressed.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            ..Default::default()
        }
    }
}

/// Capability set every codec provides.
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Whether this build can actually run the codec.
    fn is_available(&self) -> bool {
        true
    }

    /// Codec name and version for diagnostics.
    fn version(&self) -> String;

    fn compress(&self, data: &[u8], level: Option<i32>) -> Result<Vec<u8>, CompressionError>;

    /// Decode `data`, failing with [`CompressionError::SizeMismatch`] when the
    /// output length differs from `expected_size`.
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressionError>;
}

/// Codec and frame errors.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{algorithm} codec is not available in this build")]
    Unavailable { algorithm: CompressionAlgorithm },

    #[error("{algorithm} compression failed: {reason}")]
    Encode {
        algorithm: CompressionAlgorithm,
        reason: String,
    },

    #[error("{algorithm} payload could not be decoded: {reason}")]
    Decode {
        algorithm: CompressionAlgorithm,
        reason: String,
    },

    #[error("decompressed size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unknown compression algorithm id {0}")]
    UnknownAlgorithm(u16),

    #[error("frame is truncated ({actual} bytes, at least {required} required)")]
    Truncated { required: usize, actual: usize },

    #[error("not a save file (magic bytes {found:02x?})")]
    BadMagic { found: [u8; 4] },

    #[error("frame format version {found} is newer than supported version {supported}")]
    UnsupportedFormat { found: u16, supported: u16 },

    #[error("payload is {actual} bytes but header declares {declared}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("payload CRC32 mismatch (stored {stored:08x}, computed {computed:08x})")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("invalid frame header: {reason}")]
    InvalidHeader { reason: String },

    #[error("payload of {size} bytes exceeds the {limit} byte frame limit")]
    TooLarge { size: u64, limit: u64 },
}

impl CompressionError {
    /// True when the stored bytes themselves are bad, as opposed to a codec
    /// or configuration problem on the writing side.
    pub const fn is_data_error(&self) -> bool {
        !matches!(
            self,
            Self::Unavailable { .. } | Self::Encode { .. } | Self::TooLarge { .. }
        )
    }
}
