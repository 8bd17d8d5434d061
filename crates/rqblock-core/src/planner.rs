//! Block planning: how a file is split into independently codeable blocks.
//!
//! A block of `B` bytes with `K = ceil(B / S)` source symbols of `S` bytes
//! (`S` being the effective, aligned symbol size)
//! occupies roughly `B + K * S * (1 + R)` bytes while it is processed: the
//! input buffer, its source symbols and `R` repair symbols per source
//! symbol. Up to `concurrency_limit` blocks are in flight at once, so the
//! recommended block size keeps one block's footprint within
//! `memory_budget / concurrency_limit`.

use crate::config::SessionConfig;
use crate::error::{EngineError, Result};

/// RFC 6330 upper bound on source symbols in one source block.
///
/// Capping blocks here keeps per-block symbol bookkeeping from dominating
/// throughput.
pub const MAX_SOURCE_SYMBOLS_PER_BLOCK: u64 = 56_403;

/// Most source blocks the codec can split one block into
pub const MAX_SOURCE_BLOCKS: u64 = 255;

/// A contiguous byte range of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSpan {
    /// 0-based block sequence number
    pub block_id: u64,
    /// Byte offset in the original file
    pub offset: u64,
    /// Length in bytes
    pub size: u64,
}

impl BlockSpan {
    /// Offset one past the last byte of the span
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Estimated peak memory for processing one block of `block_size` bytes
#[must_use]
pub fn block_footprint(config: &SessionConfig, block_size: u64) -> u64 {
    let symbol_size = u64::from(config.effective_symbol_size());
    let source_symbols = block_size.div_ceil(symbol_size);
    let symbol_bytes = source_symbols
        .saturating_mul(symbol_size)
        .saturating_mul(1 + u64::from(config.redundancy_factor));
    block_size.saturating_add(symbol_bytes)
}

/// Largest block whose footprint fits one worker's memory share
#[must_use]
pub fn max_block_size(config: &SessionConfig) -> u64 {
    let symbol_size = u64::from(config.effective_symbol_size());
    let per_symbol = symbol_size * (2 + u64::from(config.redundancy_factor));
    let symbols = (config.worker_memory_share() / per_symbol).clamp(1, MAX_SOURCE_SYMBOLS_PER_BLOCK);
    symbols * symbol_size
}

/// Largest block the codec accepts in one piece
///
/// Explicitly requested block sizes are clamped to this.
#[must_use]
pub fn max_encodable_block_size(config: &SessionConfig) -> u64 {
    MAX_SOURCE_BLOCKS * MAX_SOURCE_SYMBOLS_PER_BLOCK * u64::from(config.effective_symbol_size())
}

/// Recommended block size for a file of `file_size` bytes
///
/// Files that fit in one maximal block become exactly one block. Larger
/// files are split into the fewest blocks that respect the memory share, with
/// sizes balanced (and rounded up to whole symbols) so no tiny tail block is
/// produced. A 0-byte file gets the maximal block size, which still plans as
/// one empty block.
#[must_use]
pub fn recommended_block_size(config: &SessionConfig, file_size: u64) -> u64 {
    let max = max_block_size(config);
    if file_size == 0 {
        return max;
    }
    if file_size <= max {
        return file_size;
    }

    let symbol_size = u64::from(config.effective_symbol_size());
    let blocks = file_size.div_ceil(max);
    let balanced = file_size.div_ceil(blocks);
    balanced.div_ceil(symbol_size).saturating_mul(symbol_size).min(max)
}

/// Split `[0, file_size)` into consecutive spans of `block_size` bytes
///
/// The final span may be shorter. A 0-byte file yields one empty span, and a
/// zero `block_size` yields one span covering the whole file.
#[must_use]
pub fn plan_blocks(file_size: u64, block_size: u64) -> Vec<BlockSpan> {
    if file_size == 0 || block_size == 0 || block_size >= file_size {
        return vec![BlockSpan {
            block_id: 0,
            offset: 0,
            size: file_size,
        }];
    }

    let count = file_size.div_ceil(block_size);
    (0..count)
        .map(|block_id| {
            let offset = block_id * block_size;
            BlockSpan {
                block_id,
                offset,
                size: block_size.min(file_size - offset),
            }
        })
        .collect()
}

/// Resolved plan for one file operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    /// Total input size
    pub file_size: u64,
    /// Block size in effect (never 0)
    pub block_size: u64,
    /// Block spans in block_id order
    pub spans: Vec<BlockSpan>,
}

impl BlockPlan {
    /// Plan a file, resolving a `requested_block_size` of 0 to the recommended size
    ///
    /// Requested sizes above [`max_encodable_block_size`] are clamped to it.
    #[must_use]
    pub fn for_file(config: &SessionConfig, file_size: u64, requested_block_size: u64) -> Self {
        let limit = max_encodable_block_size(config);
        let block_size = match requested_block_size {
            0 => recommended_block_size(config, file_size),
            requested if requested > limit => {
                tracing::debug!(
                    "Clamping requested block size {} to {} for {} byte symbols",
                    requested,
                    limit,
                    config.effective_symbol_size()
                );
                limit
            }
            requested => requested,
        };

        Self {
            file_size,
            block_size,
            spans: plan_blocks(file_size, block_size),
        }
    }

    /// Plan an existing list of spans (decode side)
    #[must_use]
    pub fn from_spans(spans: Vec<BlockSpan>) -> Self {
        let file_size = spans.last().map_or(0, BlockSpan::end);
        let block_size = spans.iter().map(|s| s.size).max().unwrap_or(0);
        Self {
            file_size,
            block_size,
            spans,
        }
    }

    /// Number of blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.spans.len()
    }

    /// Footprint of the largest block in the plan
    #[must_use]
    pub fn peak_block_footprint(&self, config: &SessionConfig) -> u64 {
        let largest = self.spans.iter().map(|s| s.size).max().unwrap_or(0);
        block_footprint(config, largest)
    }

    /// How many blocks may be processed simultaneously
    ///
    /// Bounded by the concurrency limit, by how many peak-sized blocks fit
    /// in the memory budget, and by the block count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MemoryBudgetExceeded`] if a single block does
    /// not fit in the budget.
    pub fn workers(&self, config: &SessionConfig) -> Result<usize> {
        let footprint = self.peak_block_footprint(config).max(1);
        if footprint > config.memory_budget {
            return Err(EngineError::MemoryBudgetExceeded {
                requested: footprint,
                in_use: 0,
                budget: config.memory_budget,
            });
        }

        let by_memory = usize::try_from(config.memory_budget / footprint).unwrap_or(usize::MAX);
        Ok(config
            .concurrency_limit
            .min(by_memory)
            .min(self.spans.len())
            .max(1))
    }
}
