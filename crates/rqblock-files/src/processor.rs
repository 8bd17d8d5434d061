//! Per-block encoding.

use std::sync::Arc;

use rqblock_codec::Codec;
use rqblock_core::{BlockSpan, EngineError, Result, Session};

use crate::layout::BlockRecord;
use crate::symbol_store::{SymbolStore, symbol_id};

/// Blocks at least this large are hashed on the rayon pool
#[cfg(feature = "parallel-hash")]
const PARALLEL_HASH_THRESHOLD: usize = 1024 * 1024;

/// BLAKE3 hex digest of a block's bytes
#[must_use]
pub fn block_hash(data: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    update_hasher(&mut hasher, data);
    hasher.finalize().to_hex().to_string()
}

#[cfg(feature = "parallel-hash")]
fn update_hasher(hasher: &mut blake3::Hasher, data: &[u8]) {
    if data.len() >= PARALLEL_HASH_THRESHOLD {
        hasher.update_rayon(data);
    } else {
        hasher.update(data);
    }
}

#[cfg(not(feature = "parallel-hash"))]
fn update_hasher(hasher: &mut blake3::Hasher, data: &[u8]) {
    hasher.update(data);
}

/// Result of encoding one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedBlock {
    /// Layout entry for the block
    pub record: BlockRecord,
    /// Number of source symbols
    pub source_symbols: usize,
    /// Number of repair symbols
    pub repair_symbols: usize,
}

impl ProcessedBlock {
    /// Total symbols produced
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.source_symbols + self.repair_symbols
    }
}

/// Encodes single blocks with a session's parameters
#[derive(Clone)]
pub struct BlockProcessor {
    codec: Arc<dyn Codec>,
}

impl BlockProcessor {
    /// Create a processor around a codec
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Codec in use
    #[must_use]
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Encode one block
    ///
    /// With a `sink` every symbol is written to the store; without one only
    /// the symbol identifiers are computed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionClosed`] if the session is closed,
    /// [`EngineError::InvalidArgument`] if `data` does not match the span,
    /// [`EngineError::Encoding`] if the codec rejects the block, or
    /// [`EngineError::BlockIo`] if a symbol cannot be written.
    pub fn process_block(
        &self,
        session: &Session,
        data: &[u8],
        span: BlockSpan,
        sink: Option<&SymbolStore>,
    ) -> Result<ProcessedBlock> {
        session.ensure_open()?;

        if data.len() as u64 != span.size {
            return Err(EngineError::InvalidArgument(format!(
                "block {} has {} bytes, span expects {}",
                span.block_id,
                data.len(),
                span.size
            )));
        }

        let config = session.config();
        let encoded = self
            .codec
            .encode(data, config.symbol_size, config.redundancy_factor)
            .map_err(|e| EngineError::Encoding {
                block_id: span.block_id,
                reason: e.to_string(),
            })?;

        let mut symbols = Vec::with_capacity(encoded.symbol_count());
        for symbol in encoded.symbols() {
            let id = match sink {
                Some(store) => store
                    .write(symbol)
                    .map_err(|e| EngineError::block_io(span.block_id, e))?,
                None => symbol_id(symbol),
            };
            symbols.push(id);
        }

        let hash = block_hash(data);

        tracing::debug!(
            "Block {} ({} bytes at offset {}): {} source + {} repair symbols via {}",
            span.block_id,
            span.size,
            span.offset,
            encoded.source_symbols.len(),
            encoded.repair_symbols.len(),
            self.codec.name()
        );

        Ok(ProcessedBlock {
            record: BlockRecord {
                block_id: span.block_id,
                encoder_parameters: encoded.parameters,
                original_offset: span.offset,
                size: span.size,
                symbols,
                hash,
            },
            source_symbols: encoded.source_symbols.len(),
            repair_symbols: encoded.repair_symbols.len(),
        })
    }
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProcessor")
            .field("codec", &self.codec.name())
            .finish()
    }
}
