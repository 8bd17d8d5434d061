//! RFC 6330 `RaptorQ` codec.
//!
//! Encoder parameters are the 12-byte serialized Object Transmission
//! Information (OTI). Each symbol is a serialized encoding packet: a 4-byte
//! payload id (source block number + encoding symbol id) followed by exactly
//! one symbol of data. Carrying the payload id inside the symbol is what lets
//! the engine store symbols by content hash with no ordering information.

// Symbol and block counts are bounded by RFC 6330 limits
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;

use raptorq::{Decoder, Encoder, EncodingPacket, ObjectTransmissionInformation};

use crate::error::CodecError;
use crate::{Codec, EncodedBlock};

/// Length of the serialized encoder parameters (OTI).
pub const PARAMETERS_LEN: usize = 12;

/// Length of the payload id prefix carried by every symbol.
pub const PAYLOAD_ID_LEN: usize = 4;

/// Symbol alignment used for every encoding.
pub const SYMBOL_ALIGNMENT: u16 = 8;

/// Largest transfer length representable in the OTI.
pub const MAX_TRANSFER_LENGTH: u64 = 946_270_874_880;

/// Largest number of source symbols placed in one source block.
///
/// With the default 10 MiB decoder working set this is the largest K' of
/// RFC 6330 Table 2 for every symbol size.
pub const MAX_SOURCE_SYMBOLS_PER_BLOCK: u64 = 56_403;

/// Largest number of source blocks one block may be split into.
///
/// The OTI stores the count in a single byte.
pub const MAX_SOURCE_BLOCKS: u64 = 255;

/// `RaptorQ` codec backed by the `raptorq` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaptorQCodec;

impl RaptorQCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Symbol size actually used for a requested size.
    ///
    /// Symbols are a multiple of [`SYMBOL_ALIGNMENT`]; requests below the
    /// alignment are raised to it and others are rounded down.
    #[must_use]
    pub const fn effective_symbol_size(symbol_size: u16) -> u16 {
        let size = if symbol_size < SYMBOL_ALIGNMENT {
            SYMBOL_ALIGNMENT
        } else {
            symbol_size
        };
        size - size % SYMBOL_ALIGNMENT
    }

    /// Number of `RaptorQ` source blocks a block of `len` bytes is split into.
    #[must_use]
    pub const fn source_block_count(len: u64, symbol_size: u16) -> u64 {
        let symbol_size = Self::effective_symbol_size(symbol_size) as u64;
        len.div_ceil(symbol_size).div_ceil(MAX_SOURCE_SYMBOLS_PER_BLOCK)
    }

    /// Largest block encodable in one call at `symbol_size`.
    #[must_use]
    pub const fn max_block_len(symbol_size: u16) -> u64 {
        MAX_SOURCE_BLOCKS
            * MAX_SOURCE_SYMBOLS_PER_BLOCK
            * Self::effective_symbol_size(symbol_size) as u64
    }

    /// Parse and sanity-check serialized encoder parameters.
    fn transmission_info(parameters: &[u8]) -> Result<ObjectTransmissionInformation, CodecError> {
        let bytes: &[u8; PARAMETERS_LEN] = parameters.try_into().map_err(|_| {
            CodecError::InvalidParameters(format!(
                "expected {PARAMETERS_LEN} bytes, got {}",
                parameters.len()
            ))
        })?;

        let oti = ObjectTransmissionInformation::deserialize(bytes);

        if oti.symbol_size() == 0 || oti.symbol_alignment() == 0 {
            return Err(CodecError::InvalidParameters(
                "symbol size and alignment must be non-zero".into(),
            ));
        }
        if oti.symbol_size() % u16::from(oti.symbol_alignment()) != 0 {
            return Err(CodecError::InvalidParameters(format!(
                "symbol size {} is not a multiple of alignment {}",
                oti.symbol_size(),
                oti.symbol_alignment()
            )));
        }
        if oti.source_blocks() == 0 || oti.sub_blocks() == 0 {
            return Err(CodecError::InvalidParameters(
                "source block and sub-block counts must be non-zero".into(),
            ));
        }
        if oti.transfer_length() > MAX_TRANSFER_LENGTH {
            return Err(CodecError::InvalidParameters(format!(
                "transfer length {} exceeds maximum {MAX_TRANSFER_LENGTH}",
                oti.transfer_length()
            )));
        }

        Ok(oti)
    }

    /// K: the number of source symbols for the described object.
    fn source_symbol_count(oti: &ObjectTransmissionInformation) -> usize {
        oti.transfer_length()
            .div_ceil(u64::from(oti.symbol_size())) as usize
    }
}

impl Codec for RaptorQCodec {
    fn name(&self) -> &'static str {
        "raptorq"
    }

    fn encode(
        &self,
        data: &[u8],
        symbol_size: u16,
        redundancy_factor: u8,
    ) -> Result<EncodedBlock, CodecError> {
        if symbol_size == 0 {
            return Err(CodecError::InvalidParameters(
                "symbol size must be non-zero".into(),
            ));
        }
        if redundancy_factor == 0 {
            return Err(CodecError::InvalidParameters(
                "redundancy factor must be non-zero".into(),
            ));
        }
        if data.len() as u64 > MAX_TRANSFER_LENGTH {
            return Err(CodecError::Encoding(format!(
                "block of {} bytes exceeds maximum transfer length {MAX_TRANSFER_LENGTH}",
                data.len()
            )));
        }

        let source_blocks = Self::source_block_count(data.len() as u64, symbol_size);
        if source_blocks > MAX_SOURCE_BLOCKS {
            return Err(CodecError::Encoding(format!(
                "block of {} bytes needs {source_blocks} source blocks at symbol size {} \
                 (maximum {MAX_SOURCE_BLOCKS}, at most {} bytes)",
                data.len(),
                Self::effective_symbol_size(symbol_size),
                Self::max_block_len(symbol_size)
            )));
        }

        let symbol_size = Self::effective_symbol_size(symbol_size);

        if data.is_empty() {
            let oti = ObjectTransmissionInformation::new(
                0,
                symbol_size,
                1,
                1,
                SYMBOL_ALIGNMENT as u8,
            );
            return Ok(EncodedBlock {
                parameters: oti.serialize().to_vec(),
                source_symbols: Vec::new(),
                repair_symbols: Vec::new(),
            });
        }

        let oti = ObjectTransmissionInformation::with_defaults(data.len() as u64, symbol_size);
        let encoder = Encoder::new(data, oti);

        let mut source_symbols = Vec::new();
        let mut repair_symbols = Vec::new();
        for block in encoder.get_block_encoders() {
            let source = block.source_packets();
            let repair_count = (source.len() as u32).saturating_mul(u32::from(redundancy_factor));
            source_symbols.extend(source.iter().map(EncodingPacket::serialize));
            repair_symbols.extend(
                block
                    .repair_packets(0, repair_count)
                    .iter()
                    .map(EncodingPacket::serialize),
            );
        }

        tracing::trace!(
            "raptorq encoded {} bytes into {} source + {} repair symbols ({} byte symbols)",
            data.len(),
            source_symbols.len(),
            repair_symbols.len(),
            symbol_size
        );

        Ok(EncodedBlock {
            parameters: encoder.get_config().serialize().to_vec(),
            source_symbols,
            repair_symbols,
        })
    }

    fn decode(&self, parameters: &[u8], symbols: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
        let oti = Self::transmission_info(parameters)?;
        if oti.transfer_length() == 0 {
            return Ok(Vec::new());
        }

        let required = Self::source_symbol_count(&oti);
        let expected_len = PAYLOAD_ID_LEN + usize::from(oti.symbol_size());

        let mut seen = HashSet::with_capacity(symbols.len());
        let mut packets = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if symbol.len() != expected_len {
                tracing::warn!(
                    "Skipping symbol of {} bytes (expected {})",
                    symbol.len(),
                    expected_len
                );
                continue;
            }
            let packet = EncodingPacket::deserialize(symbol);
            let id = packet.payload_id();
            if id.source_block_number() >= oti.source_blocks() {
                tracing::warn!(
                    "Skipping symbol for source block {} (object has {})",
                    id.source_block_number(),
                    oti.source_blocks()
                );
                continue;
            }
            // Duplicates add nothing to recovery
            if seen.insert((id.source_block_number(), id.encoding_symbol_id())) {
                packets.push(packet);
            }
        }

        let received = packets.len();
        if received < required {
            return Err(CodecError::InsufficientSymbols { received, required });
        }

        let mut decoder = Decoder::new(oti);
        for packet in packets {
            if let Some(data) = decoder.decode(packet) {
                if data.len() as u64 != oti.transfer_length() {
                    return Err(CodecError::Decoding(format!(
                        "reconstructed {} bytes, expected {}",
                        data.len(),
                        oti.transfer_length()
                    )));
                }
                return Ok(data);
            }
        }

        // Enough symbols by count, but not a full-rank set
        Err(CodecError::InsufficientSymbols {
            received,
            required: received + 1,
        })
    }

    fn required_symbols(&self, parameters: &[u8]) -> Result<usize, CodecError> {
        let oti = Self::transmission_info(parameters)?;
        Ok(Self::source_symbol_count(&oti))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn effective_symbol_size_alignment() {
        assert_eq!(RaptorQCodec::effective_symbol_size(1), 8);
        assert_eq!(RaptorQCodec::effective_symbol_size(8), 8);
        assert_eq!(RaptorQCodec::effective_symbol_size(1023), 1016);
        assert_eq!(RaptorQCodec::effective_symbol_size(1024), 1024);
        assert_eq!(RaptorQCodec::effective_symbol_size(65535), 65528);
    }

    #[test]
    fn source_block_count_boundaries() {
        assert_eq!(RaptorQCodec::source_block_count(0, 1024), 0);
        assert_eq!(RaptorQCodec::source_block_count(1, 1024), 1);
        assert_eq!(RaptorQCodec::source_block_count(56_403 * 8, 8), 1);
        assert_eq!(RaptorQCodec::source_block_count(56_403 * 8 + 1, 8), 2);
        // Sizes below the alignment behave as 8
        assert_eq!(RaptorQCodec::source_block_count(56_403 * 8 + 1, 3), 2);

        let limit = RaptorQCodec::max_block_len(8);
        assert_eq!(limit, 255 * 56_403 * 8);
        assert_eq!(RaptorQCodec::source_block_count(limit, 8), 255);
        assert_eq!(RaptorQCodec::source_block_count(limit + 1, 8), 256);
        assert_eq!(
            RaptorQCodec::max_block_len(1023),
            RaptorQCodec::max_block_len(1016)
        );
    }

    #[test]
    fn oversized_block_is_rejected() {
        let codec = RaptorQCodec::new();
        // One byte past 255 source blocks of 8-byte symbols
        let data = vec![0u8; (255 * 56_403 * 8) + 1];
        let result = codec.encode(&data, 8, 1);
        assert!(
            matches!(result, Err(CodecError::Encoding(ref message)) if message.contains("256 source blocks")),
            "{result:?}"
        );
    }

    #[test]
    fn multi_source_block_roundtrip() {
        let codec = RaptorQCodec::new();
        // Just past one source block of 56403 eight-byte symbols
        let data = payload(56_403 * 8 + 4_000);
        let encoded = codec.encode(&data, 8, 1).unwrap();
        let oti = RaptorQCodec::transmission_info(&encoded.parameters).unwrap();
        assert_eq!(oti.source_blocks(), 2);
        assert_eq!(
            codec.required_symbols(&encoded.parameters).unwrap(),
            data.len().div_ceil(8)
        );

        // Drop every fourth source symbol and recover from repair symbols
        let symbols: Vec<Vec<u8>> = encoded
            .source_symbols
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 4 != 0)
            .map(|(_, symbol)| symbol.clone())
            .chain(encoded.repair_symbols.iter().cloned())
            .collect();
        let decoded = codec.decode(&encoded.parameters, &symbols).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn encode_counts_follow_redundancy_factor() {
        let codec = RaptorQCodec::new();
        let data = payload(64 * 100);
        let encoded = codec.encode(&data, 64, 3).unwrap();

        assert_eq!(encoded.parameters.len(), PARAMETERS_LEN);
        assert_eq!(encoded.source_symbols.len(), 100);
        assert_eq!(encoded.repair_symbols.len(), 300);
        assert_eq!(encoded.symbol_count(), 400);
        assert!(
            encoded
                .symbols()
                .all(|symbol| symbol.len() == PAYLOAD_ID_LEN + 64)
        );
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = RaptorQCodec::new();
        let data = payload(5000);
        let first = codec.encode(&data, 128, 2).unwrap();
        let second = codec.encode(&data, 128, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_with_all_symbols() {
        let codec = RaptorQCodec::new();
        let data = payload(10_000);
        let encoded = codec.encode(&data, 256, 2).unwrap();
        let symbols: Vec<Vec<u8>> = encoded.symbols().map(<[u8]>::to_vec).collect();

        let decoded = codec.decode(&encoded.parameters, &symbols).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_with_source_symbols_only() {
        let codec = RaptorQCodec::new();
        let data = payload(4099); // Final source symbol is partial
        let encoded = codec.encode(&data, 64, 1).unwrap();

        let decoded = codec
            .decode(&encoded.parameters, &encoded.source_symbols)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_with_repair_symbols_only() {
        let codec = RaptorQCodec::new();
        let data = payload(3200);
        let encoded = codec.encode(&data, 64, 2).unwrap();

        let decoded = codec
            .decode(&encoded.parameters, &encoded.repair_symbols)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_with_random_subset() {
        let codec = RaptorQCodec::new();
        let data = payload(20_000);
        let encoded = codec.encode(&data, 200, 4).unwrap();
        let required = codec.required_symbols(&encoded.parameters).unwrap();
        assert_eq!(required, 100);

        let mut symbols: Vec<Vec<u8>> = encoded.symbols().map(<[u8]>::to_vec).collect();
        let mut rng = StdRng::seed_from_u64(7);
        symbols.shuffle(&mut rng);
        symbols.truncate(required + 5);

        let decoded = codec.decode(&encoded.parameters, &symbols).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn decode_with_exactly_required_symbols() {
        let codec = RaptorQCodec::new();
        let data = payload(12_800);
        let encoded = codec.encode(&data, 128, 2).unwrap();
        let required = codec.required_symbols(&encoded.parameters).unwrap();
        assert_eq!(required, 100);

        // Zero-overhead recovery succeeds with high but not certain probability
        let mut recovered = 0;
        for seed in 0..10 {
            let mut symbols: Vec<Vec<u8>> = encoded.symbols().map(<[u8]>::to_vec).collect();
            symbols.shuffle(&mut StdRng::seed_from_u64(seed));
            symbols.truncate(required);
            assert!(symbols.iter().any(|s| encoded.source_symbols.contains(s)));
            assert!(symbols.iter().any(|s| encoded.repair_symbols.contains(s)));

            match codec.decode(&encoded.parameters, &symbols) {
                Ok(decoded) => {
                    assert_eq!(decoded, data);
                    recovered += 1;
                }
                Err(err) => assert!(
                    matches!(err, CodecError::InsufficientSymbols { received: 100, .. }),
                    "{err:?}"
                ),
            }
        }
        assert!(recovered >= 8, "only {recovered} of 10 zero-overhead decodes succeeded");
    }

    #[test]
    fn decode_below_threshold_fails() {
        let codec = RaptorQCodec::new();
        let data = payload(6400);
        let encoded = codec.encode(&data, 64, 2).unwrap();

        let symbols: Vec<Vec<u8>> = encoded.source_symbols[..99].to_vec();
        let result = codec.decode(&encoded.parameters, &symbols);
        assert_eq!(
            result,
            Err(CodecError::InsufficientSymbols {
                received: 99,
                required: 100
            })
        );
    }

    #[test]
    fn duplicate_symbols_do_not_count_twice() {
        let codec = RaptorQCodec::new();
        let data = payload(640);
        let encoded = codec.encode(&data, 64, 1).unwrap();

        let symbols = vec![encoded.source_symbols[0].clone(); 10];
        let result = codec.decode(&encoded.parameters, &symbols);
        assert!(matches!(
            result,
            Err(CodecError::InsufficientSymbols { received: 1, .. })
        ));
    }

    #[test]
    fn malformed_symbols_are_skipped() {
        let codec = RaptorQCodec::new();
        let data = payload(640);
        let encoded = codec.encode(&data, 64, 1).unwrap();

        let mut symbols: Vec<Vec<u8>> = encoded.symbols().map(<[u8]>::to_vec).collect();
        symbols.push(vec![0u8; 3]);
        symbols.push(vec![0u8; 1000]);

        let decoded = codec.decode(&encoded.parameters, &symbols).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_block_roundtrip() {
        let codec = RaptorQCodec::new();
        let encoded = codec.encode(&[], 1024, 4).unwrap();

        assert_eq!(encoded.parameters.len(), PARAMETERS_LEN);
        assert_eq!(encoded.symbol_count(), 0);
        assert_eq!(codec.required_symbols(&encoded.parameters).unwrap(), 0);
        assert!(codec.decode(&encoded.parameters, &[]).unwrap().is_empty());
    }

    #[test]
    fn tiny_symbol_size_is_raised_to_alignment() {
        let codec = RaptorQCodec::new();
        let data = payload(100);
        let encoded = codec.encode(&data, 1, 1).unwrap();

        // 100 bytes in 8-byte symbols
        assert_eq!(encoded.source_symbols.len(), 13);
        let decoded = codec
            .decode(&encoded.parameters, &encoded.source_symbols)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let codec = RaptorQCodec::new();
        assert!(matches!(
            codec.required_symbols(&[1, 2, 3]),
            Err(CodecError::InvalidParameters(_))
        ));
        assert!(matches!(
            codec.decode(&[0u8; PARAMETERS_LEN], &[]),
            Err(CodecError::InvalidParameters(_))
        ));
    }

    #[test]
    fn zero_arguments_rejected() {
        let codec = RaptorQCodec::new();
        assert!(matches!(
            codec.encode(b"data", 0, 1),
            Err(CodecError::InvalidParameters(_))
        ));
        assert!(matches!(
            codec.encode(b"data", 64, 0),
            Err(CodecError::InvalidParameters(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_decode_inverts_encode(
            data in proptest::collection::vec(any::<u8>(), 1..16_384),
            symbol_size in 1u16..=1024,
            redundancy_factor in 1u8..=4,
            seed in any::<u64>(),
        ) {
            let codec = RaptorQCodec::new();
            let encoded = codec.encode(&data, symbol_size, redundancy_factor).unwrap();
            let required = codec.required_symbols(&encoded.parameters).unwrap();
            prop_assert_eq!(encoded.source_symbols.len(), required);
            prop_assert_eq!(
                encoded.repair_symbols.len(),
                required * usize::from(redundancy_factor)
            );

            let mut symbols: Vec<Vec<u8>> = encoded.symbols().map(<[u8]>::to_vec).collect();
            symbols.shuffle(&mut StdRng::seed_from_u64(seed));
            symbols.truncate(required + 4);

            let decoded = codec.decode(&encoded.parameters, &symbols).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }
}
