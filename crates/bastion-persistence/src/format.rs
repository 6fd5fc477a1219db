//! Save document layout and the encode/decode pipeline around it.
//!
//! A save document is a tree:
//!
//! ```text
//! {
//!   "header":   { "version", "timestamp", "format", "created_by" },
//!   "systems":  { "<system name>": <tree>, ... },
//!   "checksum": "<sha256 hex of the canonical document without this key>"
//! }
//! ```
//!
//! It is canonicalized, compressed and framed (see [`crate::compression`]).
//! Decoding checks the frame CRC before decompressing and the document
//! checksum after parsing.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::canonical::{CanonicalError, CanonicalSerializer, parse_canonical};
use crate::compression::{
    CompressedData, CompressionAlgorithm, CompressionEngine, CompressionError, FrameHeader,
};
use crate::error::{PersistenceError, Result};
use crate::tree::TreeValue;
use crate::version::SaveVersion;

/// Value of `header.format`.
pub const DOCUMENT_FORMAT: &str = "bastion-save";

/// Value of `header.created_by`.
pub const CREATED_BY: &str = concat!("bastion-persistence ", env!("CARGO_PKG_VERSION"));

const HEADER_KEY: &str = "header";
const SYSTEMS_KEY: &str = "systems";
const CHECKSUM_KEY: &str = "checksum";

/// Build the header subtree for a new save.
pub fn document_header(version: &SaveVersion, timestamp: DateTime<Utc>) -> TreeValue {
    TreeValue::object()
        .with("version", version.to_string())
        .with("timestamp", timestamp.to_rfc3339())
        .with("format", DOCUMENT_FORMAT)
        .with("created_by", CREATED_BY)
}

/// A document ready to write, plus the checksum embedded in it.
#[derive(Debug, Clone)]
pub struct SealedDocument {
    pub document: TreeValue,
    pub content_digest: String,
}

/// Assemble header and systems and embed the content checksum.
pub fn seal_document(
    header: TreeValue,
    systems: Vec<(String, TreeValue)>,
    canonical: &CanonicalSerializer,
    path: &Path,
) -> Result<SealedDocument> {
    let unsigned = TreeValue::object()
        .with(HEADER_KEY, header)
        .with(SYSTEMS_KEY, TreeValue::Object(systems));
    let content_digest = canonical
        .digest(&unsigned)
        .map_err(|e| serialization_error(path, e))?;
    let document = unsigned.with(CHECKSUM_KEY, content_digest.clone());
    Ok(SealedDocument {
        document,
        content_digest,
    })
}

/// Canonical bytes of a sealed document.
pub fn encode_document(
    document: &TreeValue,
    canonical: &CanonicalSerializer,
    path: &Path,
) -> Result<Arc<[u8]>> {
    canonical
        .canonicalize(document)
        .map_err(|e| serialization_error(path, e))
}

/// Digest of `document` with the checksum key removed.
pub fn content_digest(
    document: &TreeValue,
    canonical: &CanonicalSerializer,
    path: &Path,
) -> Result<String> {
    let mut unsigned = document.clone();
    unsigned.remove(CHECKSUM_KEY);
    canonical
        .digest(&unsigned)
        .map_err(|e| serialization_error(path, e))
}

/// Replace the embedded checksum after the document changed (e.g. a migration).
pub fn reseal_document(
    mut document: TreeValue,
    canonical: &CanonicalSerializer,
    path: &Path,
) -> Result<SealedDocument> {
    document.remove(CHECKSUM_KEY);
    let content_digest = canonical
        .digest(&document)
        .map_err(|e| serialization_error(path, e))?;
    document.insert(CHECKSUM_KEY, content_digest.clone());
    Ok(SealedDocument {
        document,
        content_digest,
    })
}

/// Header of a frame, without touching the payload.
pub fn read_frame_header(path: &Path, bytes: &[u8]) -> Result<FrameHeader> {
    FrameHeader::parse(bytes).map_err(|e| frame_error(path, e))
}

/// Parse a whole frame and verify its CRC.
pub fn parse_frame(path: &Path, bytes: &[u8]) -> Result<CompressedData> {
    CompressedData::from_bytes(bytes).map_err(|e| frame_error(path, e))
}

/// Decompress a verified frame.
pub fn decompress_frame(
    engine: &CompressionEngine,
    path: &Path,
    frame: &CompressedData,
) -> Result<Vec<u8>> {
    engine
        .decompress(frame)
        .map(|(bytes, _)| bytes)
        .map_err(|e| frame_error(path, e))
}

/// Parse canonical text into a document tree.
pub fn parse_document(path: &Path, bytes: &[u8]) -> Result<TreeValue> {
    let document = parse_canonical(bytes).map_err(|e| PersistenceError::CorruptionDetected {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !document.is_object() {
        return Err(PersistenceError::CorruptionDetected {
            path: path.to_path_buf(),
            reason: format!("document root is {}", document.type_name()),
        });
    }
    Ok(document)
}

/// Checksum embedded in the document, if any.
pub fn stored_checksum(document: &TreeValue) -> Option<&str> {
    document.get(CHECKSUM_KEY).and_then(TreeValue::as_str)
}

/// Check the embedded content checksum. Documents without one pass and
/// return `None`; the structure validator reports the omission.
pub fn verify_content_checksum(
    document: &TreeValue,
    canonical: &CanonicalSerializer,
    path: &Path,
) -> Result<Option<String>> {
    let Some(expected) = stored_checksum(document) else {
        return Ok(None);
    };
    let actual = content_digest(document, canonical, path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(PersistenceError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(Some(actual))
}

/// `header.version` of a document.
pub fn document_version(path: &Path, document: &TreeValue) -> Result<SaveVersion> {
    let raw = document
        .get(HEADER_KEY)
        .and_then(|h| h.get("version"))
        .and_then(TreeValue::as_str)
        .ok_or_else(|| PersistenceError::CorruptionDetected {
            path: path.to_path_buf(),
            reason: "document header has no version".to_string(),
        })?;
    raw.parse::<SaveVersion>()
        .map_err(|e| PersistenceError::CorruptionDetected {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// `header.timestamp` of a document, if present and well formed.
pub fn document_timestamp(document: &TreeValue) -> Option<DateTime<Utc>> {
    document
        .get(HEADER_KEY)
        .and_then(|h| h.get("timestamp"))
        .and_then(TreeValue::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// `(name, tree)` pairs of the systems section.
pub fn document_systems(document: &TreeValue) -> &[(String, TreeValue)] {
    document
        .get(SYSTEMS_KEY)
        .and_then(TreeValue::as_object)
        .unwrap_or_default()
}

/// A fully decoded and checksum-verified save.
#[derive(Debug, Clone)]
pub struct DecodedSave {
    pub document: TreeValue,
    pub version: SaveVersion,
    pub algorithm: CompressionAlgorithm,
    pub original_size: u64,
    pub stored_size: u64,
    /// `None` for legacy documents without an embedded checksum.
    pub content_digest: Option<String>,
}

/// Frame, CRC, decompress, parse, content checksum, version.
pub fn decode_save(
    path: &Path,
    bytes: &[u8],
    engine: &CompressionEngine,
    canonical: &CanonicalSerializer,
) -> Result<DecodedSave> {
    let frame = parse_frame(path, bytes)?;
    let raw = decompress_frame(engine, path, &frame)?;
    let document = parse_document(path, &raw)?;
    let content_digest = verify_content_checksum(&document, canonical, path)?;
    let version = document_version(path, &document)?;
    Ok(DecodedSave {
        document,
        version,
        algorithm: frame.algorithm,
        original_size: frame.original_size,
        stored_size: frame.compressed_size,
        content_digest,
    })
}

/// Map codec and frame failures onto file-level errors.
pub fn frame_error(path: &Path, error: CompressionError) -> PersistenceError {
    match error {
        CompressionError::ChecksumMismatch { stored, computed } => {
            PersistenceError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: format!("{stored:08x}"),
                actual: format!("{computed:08x}"),
            }
        }
        e if e.is_data_error() => PersistenceError::CorruptionDetected {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        e => PersistenceError::Compression(e),
    }
}

fn serialization_error(path: &Path, error: CanonicalError) -> PersistenceError {
    PersistenceError::Serialization {
        context: format!("save document for {}", path.display()),
        reason: error.to_string(),
    }
}
