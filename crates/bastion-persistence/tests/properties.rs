//! Property tests for the byte-level building blocks.

mod common;

use std::fs;

use bastion_persistence::canonical::{parse_canonical, to_canonical_bytes};
use bastion_persistence::compression::{CompressedData, CompressionError};
use bastion_persistence::{
    CompressionAlgorithm, CompressionConfig, CompressionEngine, ErrorKind, SaveVersion, TreeValue,
};
use proptest::prelude::*;
use tempfile::tempdir;

use common::{Realm, chronicle, deflating_orchestrator_at};

fn engine() -> CompressionEngine {
    CompressionEngine::new(CompressionConfig {
        min_size_threshold: 0,
        ..CompressionConfig::default()
    })
}

fn leaf() -> impl Strategy<Value = TreeValue> {
    prop_oneof![
        Just(TreeValue::Null),
        any::<bool>().prop_map(TreeValue::from),
        any::<i64>().prop_map(TreeValue::from),
        "[a-z ]{0,12}".prop_map(TreeValue::from),
    ]
}

proptest! {
    #[test]
    fn compressed_frames_decode_to_the_input(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        repeat in 1usize..4,
    ) {
        let data = data.repeat(repeat);
        let engine = engine();
        for algorithm in engine.factory().available_algorithms() {
            let (frame, _) = engine.compress_with(&data, algorithm).unwrap();
            let parsed = CompressedData::from_bytes(&frame.to_bytes()).unwrap();
            let (decoded, _) = engine.decompress(&parsed).unwrap();
            prop_assert_eq!(&decoded, &data, "algorithm {}", algorithm);
        }
    }

    #[test]
    fn canonical_bytes_ignore_key_insertion_order(
        entries in prop::collection::btree_map("[a-z]{1,8}", leaf(), 0..12),
    ) {
        let forward = entries
            .iter()
            .fold(TreeValue::object(), |tree, (k, v)| tree.with(k.clone(), v.clone()));
        let backward = entries
            .iter()
            .rev()
            .fold(TreeValue::object(), |tree, (k, v)| tree.with(k.clone(), v.clone()));

        let a = to_canonical_bytes(&forward).unwrap();
        let b = to_canonical_bytes(&backward).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(parse_canonical(&a).unwrap(), forward);
    }

    #[test]
    fn any_flipped_payload_byte_fails_the_crc(
        data in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
    ) {
        let frame = CompressedData::new(CompressionAlgorithm::None, data.len(), data);
        let mut bytes = frame.to_bytes();
        let header = bytes.len() - frame.payload.len();
        let at = header + index.index(frame.payload.len());
        bytes[at] ^= 0x01;
        let is_checksum_mismatch = matches!(
            CompressedData::from_bytes(&bytes),
            Err(CompressionError::ChecksumMismatch { .. })
        );
        prop_assert!(is_checksum_mismatch);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn any_damaged_byte_of_a_save_fails_the_load_or_changes_nothing(
        index in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let dir = tempdir().unwrap();
        let orchestrator = deflating_orchestrator_at(dir.path(), SaveVersion::new(1, 0, 0));
        let realm = Realm::new("realm", chronicle());
        orchestrator.register_system(realm.clone());
        let path = orchestrator.save_game("slot").path.unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let at = index.index(bytes.len());
        bytes[at] ^= mask;
        fs::write(&path, &bytes).unwrap();

        let loaded = orchestrator.load_game("slot");
        if loaded.is_success() {
            prop_assert_eq!(realm.restored(), Some(chronicle()));
        } else {
            prop_assert!(
                matches!(
                    loaded.error_kind,
                    Some(ErrorKind::ChecksumMismatch | ErrorKind::CorruptionDetected)
                ),
                "byte {} ^ {:#04x}: {}",
                at,
                mask,
                loaded
            );
            prop_assert_eq!(realm.restored(), None);
        }
    }
}

#[test]
fn empty_payload_round_trips_with_every_algorithm() {
    let engine = engine();
    for algorithm in engine.factory().available_algorithms() {
        let (frame, stats) = engine.compress_with(&[], algorithm).unwrap();
        assert_eq!(stats.original_size, 0);
        let (decoded, _) = engine.decompress(&frame).unwrap();
        assert!(decoded.is_empty(), "{algorithm}");
    }
}
