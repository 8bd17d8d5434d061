//! Property-based tests for reconstruction and planning

use std::fs;

use proptest::prelude::*;
use rqblock_core::planner::plan_blocks;
use rqblock_files::Engine;
use rqblock_integration_tests::{config, random_bytes, write_file};
use tempfile::TempDir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_decode_inverts_encode(
        len in 0usize..40_000,
        seed in any::<u64>(),
        symbol_size in prop::sample::select(vec![64u16, 512, 1024, 1500]),
        redundancy in 1u8..4,
        block_size in prop::option::of(2048u64..20_000),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::new();
        let session = engine
            .open_session(config(symbol_size, redundancy, 64, 3))
            .unwrap();

        let data = random_bytes(len, seed);
        let input = write_file(temp_dir.path(), "input.bin", &data);
        let symbols = temp_dir.path().join("symbols");
        let result = engine
            .encode_file(&session, &input, &symbols, block_size.unwrap_or(0))
            .unwrap();

        let covered: u64 = result.blocks.iter().map(|b| b.size).sum();
        prop_assert_eq!(covered, len as u64);

        let output = temp_dir.path().join("output.bin");
        engine
            .decode(&session, &symbols, &output, &result.layout_file_path)
            .unwrap();
        prop_assert_eq!(fs::read(&output).unwrap(), data);
    }

    #[test]
    fn prop_blocks_partition_file(
        file_size in 0u64..10_000_000,
        block_size in 0u64..3_000_000,
    ) {
        let spans = plan_blocks(file_size, block_size);
        prop_assert!(!spans.is_empty());

        let mut offset = 0;
        for (i, span) in spans.iter().enumerate() {
            prop_assert_eq!(span.block_id, i as u64);
            prop_assert_eq!(span.offset, offset);
            offset += span.size;
        }
        prop_assert_eq!(offset, file_size);

        if file_size == 0 || block_size == 0 || block_size >= file_size {
            prop_assert_eq!(spans.len(), 1);
        }
    }
}
