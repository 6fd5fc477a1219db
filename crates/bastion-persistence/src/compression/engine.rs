//! Compression policy and statistics.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::codecs::{DeflateCompressor, PassthroughCompressor, ZstdCompressor};
use super::frame::{CompressedData, MAX_ORIGINAL_SIZE};
use super::{
    CompressionAlgorithm, CompressionConfig, CompressionError, Compressor, MIN_USEFUL_RATIO,
};

/// Owned registry of codecs.
pub struct CompressionFactory {
    codecs: Vec<Box<dyn Compressor>>,
}

impl Default for CompressionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionFactory {
    /// Registry with every built-in codec.
    pub fn new() -> Self {
        Self {
            codecs: vec![
                Box::new(PassthroughCompressor),
                Box::new(DeflateCompressor::fast()),
                Box::new(DeflateCompressor::high_ratio()),
                Box::new(ZstdCompressor::default()),
            ],
        }
    }

    /// Replace or add a codec.
    pub fn register(&mut self, codec: Box<dyn Compressor>) {
        let algorithm = codec.algorithm();
        self.codecs.retain(|c| c.algorithm() != algorithm);
        self.codecs.push(codec);
    }

    pub fn get(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Compressor> {
        self.codecs
            .iter()
            .find(|c| c.algorithm() == algorithm)
            .map(|c| &**c)
    }

    pub fn available_algorithms(&self) -> Vec<CompressionAlgorithm> {
        let mut algorithms: Vec<_> = self
            .codecs
            .iter()
            .filter(|c| c.is_available())
            .map(|c| c.algorithm())
            .collect();
        algorithms.sort();
        algorithms
    }

    /// `preferred` if a codec for it is available, otherwise `None`.
    pub fn select(&self, preferred: CompressionAlgorithm) -> CompressionAlgorithm {
        match self.get(preferred) {
            Some(codec) if codec.is_available() => preferred,
            _ => CompressionAlgorithm::None,
        }
    }
}

/// Statistics for a single compress or decompress call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionStats {
    /// Algorithm actually recorded in the frame.
    pub algorithm: CompressionAlgorithm,
    pub original_size: u64,
    pub compressed_size: u64,
    #[serde(with = "duration_micros")]
    pub elapsed: Duration,
    /// Payload was below the size threshold.
    pub bypassed: bool,
}

impl CompressionStats {
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }
}

/// Cumulative counters across the engine's lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressionStatistics {
    pub compressions: u64,
    pub decompressions: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Below the minimum size threshold.
    pub bypassed: u64,
    /// Compressed output was not small enough to keep.
    pub stored_uncompressed: u64,
    pub failures: u64,
    pub per_algorithm: BTreeMap<CompressionAlgorithm, u64>,
    #[serde(with = "duration_micros")]
    pub total_compress_time: Duration,
    #[serde(with = "duration_micros")]
    pub total_decompress_time: Duration,
}

impl CompressionStatistics {
    /// Mean output/input ratio over all compress calls.
    pub fn average_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            1.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64
        }
    }
}

/// Applies the size policy and keeps statistics.
pub struct CompressionEngine {
    config: CompressionConfig,
    factory: CompressionFactory,
    stats: Mutex<CompressionStatistics>,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        Self::with_factory(config, CompressionFactory::new())
    }

    pub fn with_factory(config: CompressionConfig, factory: CompressionFactory) -> Self {
        Self {
            config,
            factory,
            stats: Mutex::new(CompressionStatistics::default()),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn factory(&self) -> &CompressionFactory {
        &self.factory
    }

    /// Algorithm new saves will use.
    pub fn default_algorithm(&self) -> CompressionAlgorithm {
        self.factory.select(self.config.algorithm)
    }

    /// Compress with the configured algorithm.
    pub fn compress(
        &self,
        data: &[u8],
    ) -> Result<(CompressedData, CompressionStats), CompressionError> {
        self.compress_with(data, self.default_algorithm())
    }

    /// Compress with an explicit algorithm, applying the size policy.
    pub fn compress_with(
        &self,
        data: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<(CompressedData, CompressionStats), CompressionError> {
        let start = Instant::now();
        if data.len() as u64 > MAX_ORIGINAL_SIZE {
            self.lock_stats().failures += 1;
            return Err(CompressionError::TooLarge {
                size: data.len() as u64,
                limit: MAX_ORIGINAL_SIZE,
            });
        }
        let bypassed = data.len() < self.config.min_size_threshold;
        let algorithm = if bypassed {
            CompressionAlgorithm::None
        } else {
            algorithm
        };

        let codec = self
            .factory
            .get(algorithm)
            .filter(|c| c.is_available())
            .ok_or(CompressionError::Unavailable { algorithm });
        let encoded = codec.and_then(|c| c.compress(data, self.config.level));
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                self.lock_stats().failures += 1;
                return Err(e);
            }
        };

        let mut stored_uncompressed = false;
        let frame = if algorithm != CompressionAlgorithm::None
            && encoded.len() as f64 >= data.len() as f64 * MIN_USEFUL_RATIO
        {
            stored_uncompressed = true;
            CompressedData::new(CompressionAlgorithm::None, data.len(), data.to_vec())
        } else {
            CompressedData::new(algorithm, data.len(), encoded)
        };

        let stats = CompressionStats {
            algorithm: frame.algorithm,
            original_size: frame.original_size,
            compressed_size: frame.compressed_size,
            elapsed: start.elapsed(),
            bypassed,
        };

        {
            let mut totals = self.lock_stats();
            totals.compressions += 1;
            totals.bytes_in += stats.original_size;
            totals.bytes_out += stats.compressed_size;
            totals.total_compress_time += stats.elapsed;
            if bypassed {
                totals.bypassed += 1;
            }
            if stored_uncompressed {
                totals.stored_uncompressed += 1;
            }
            *totals.per_algorithm.entry(frame.algorithm).or_default() += 1;
        }

        tracing::debug!(
            algorithm = %frame.algorithm,
            original = stats.original_size,
            compressed = stats.compressed_size,
            "compressed payload"
        );
        Ok((frame, stats))
    }

    /// Verify the frame CRC, then decode to exactly `original_size` bytes.
    pub fn decompress(
        &self,
        frame: &CompressedData,
    ) -> Result<(Vec<u8>, CompressionStats), CompressionError> {
        let start = Instant::now();
        let result = frame.verify_checksum().and_then(|()| {
            let codec = self
                .factory
                .get(frame.algorithm)
                .filter(|c| c.is_available())
                .ok_or(CompressionError::Unavailable {
                    algorithm: frame.algorithm,
                })?;
            let expected = usize::try_from(frame.original_size).map_err(|_| {
                CompressionError::SizeMismatch {
                    expected: frame.original_size,
                    actual: 0,
                }
            })?;
            codec.decompress(&frame.payload, expected)
        });

        let mut totals = self.lock_stats();
        match result {
            Ok(bytes) => {
                let stats = CompressionStats {
                    algorithm: frame.algorithm,
                    original_size: frame.original_size,
                    compressed_size: frame.compressed_size,
                    elapsed: start.elapsed(),
                    bypassed: false,
                };
                totals.decompressions += 1;
                totals.total_decompress_time += stats.elapsed;
                Ok((bytes, stats))
            }
            Err(e) => {
                totals.failures += 1;
                Err(e)
            }
        }
    }

    pub fn statistics(&self) -> CompressionStatistics {
        self.lock_stats().clone()
    }

    pub fn reset_statistics(&self) {
        *self.lock_stats() = CompressionStatistics::default();
    }

    /// Suggest an algorithm for `data` from its size and byte entropy.
    pub fn recommend_algorithm(&self, data: &[u8]) -> CompressionAlgorithm {
        if data.len() < self.config.min_size_threshold || is_likely_compressed(data) {
            return CompressionAlgorithm::None;
        }
        let preferred = if data.len() > 16 * 1024 * 1024 {
            CompressionAlgorithm::Fast
        } else if estimate_entropy(data) < 5.0 {
            CompressionAlgorithm::HighRatio
        } else {
            CompressionAlgorithm::Balanced
        };
        match self.factory.select(preferred) {
            CompressionAlgorithm::None => self.factory.select(CompressionAlgorithm::Fast),
            selected => selected,
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, CompressionStatistics> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shannon entropy in bits per byte (0.0 to 8.0).
pub fn estimate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Known compressed-container signatures, or near-random bytes.
pub fn is_likely_compressed(data: &[u8]) -> bool {
    const SIGNATURES: [&[u8]; 5] = [
        &[0x1f, 0x8b],             // gzip
        &[0x28, 0xb5, 0x2f, 0xfd], // zstd
        b"PK\x03\x04",             // zip
        b"\x89PNG",
        b"BZh",
    ];
    if SIGNATURES.iter().any(|sig| data.starts_with(sig)) {
        return true;
    }
    data.len() >= 256 && estimate_entropy(data) > 7.5
}

mod duration_micros {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(algorithm: CompressionAlgorithm) -> CompressionEngine {
        CompressionEngine::new(CompressionConfig {
            algorithm,
            ..Default::default()
        })
    }

    fn text(len: usize) -> Vec<u8> {
        b"the legion marches north at dawn. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_small_payload_bypasses_compression() {
        let engine = engine(CompressionAlgorithm::HighRatio);
        let (frame, stats) = engine.compress(&text(100)).unwrap();
        assert_eq!(frame.algorithm, CompressionAlgorithm::None);
        assert!(stats.bypassed);
        assert_eq!(engine.statistics().bypassed, 1);
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let engine = engine(CompressionAlgorithm::Fast);
        let data = text(8192);
        let (frame, stats) = engine.compress(&data).unwrap();
        assert_eq!(frame.algorithm, CompressionAlgorithm::Fast);
        assert!(stats.ratio() < 0.5);
        let (back, _) = engine.decompress(&frame).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_incompressible_payload_stored_raw() {
        let engine = engine(CompressionAlgorithm::HighRatio);
        // xorshift noise does not deflate
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let (frame, _) = engine.compress(&data).unwrap();
        assert_eq!(frame.algorithm, CompressionAlgorithm::None);
        assert_eq!(frame.payload, data);
        assert_eq!(engine.statistics().stored_uncompressed, 1);
    }

    #[test]
    fn test_decompress_checks_crc_first() {
        let engine = engine(CompressionAlgorithm::Fast);
        let (mut frame, _) = engine.compress(&text(4096)).unwrap();
        frame.payload[3] ^= 0xff;
        assert!(matches!(
            engine.decompress(&frame),
            Err(CompressionError::ChecksumMismatch { .. })
        ));
        assert_eq!(engine.statistics().failures, 1);
    }

    #[test]
    fn test_decompress_detects_size_desync() {
        let engine = engine(CompressionAlgorithm::Fast);
        let (mut frame, _) = engine.compress(&text(4096)).unwrap();
        frame.original_size += 1;
        assert!(matches!(
            engine.decompress(&frame),
            Err(CompressionError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_factory_falls_back_when_unavailable() {
        struct Broken;
        impl Compressor for Broken {
            fn algorithm(&self) -> CompressionAlgorithm {
                CompressionAlgorithm::HighRatio
            }
            fn is_available(&self) -> bool {
                false
            }
            fn version(&self) -> String {
                "broken".into()
            }
            fn compress(&self, _: &[u8], _: Option<i32>) -> Result<Vec<u8>, CompressionError> {
                unreachable!()
            }
            fn decompress(&self, _: &[u8], _: usize) -> Result<Vec<u8>, CompressionError> {
                unreachable!()
            }
        }

        let mut factory = CompressionFactory::new();
        factory.register(Box::new(Broken));
        assert_eq!(
            factory.select(CompressionAlgorithm::HighRatio),
            CompressionAlgorithm::None
        );
        assert!(
            !factory
                .available_algorithms()
                .contains(&CompressionAlgorithm::HighRatio)
        );
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(estimate_entropy(&[]), 0.0);
        assert_eq!(estimate_entropy(&[7; 100]), 0.0);
        let all: Vec<u8> = (0..=255).collect();
        assert!((estimate_entropy(&all) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommend_algorithm() {
        let engine = engine(CompressionAlgorithm::Fast);
        assert_eq!(engine.recommend_algorithm(b"tiny"), CompressionAlgorithm::None);
        assert_eq!(
            engine.recommend_algorithm(&text(4096)),
            CompressionAlgorithm::HighRatio
        );
        assert_eq!(
            engine.recommend_algorithm(&[0x1f, 0x8b, 0, 0].repeat(512)),
            CompressionAlgorithm::None
        );
    }
}
