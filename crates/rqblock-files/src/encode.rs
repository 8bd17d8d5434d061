//! File-level encoding: symbols plus layout, or layout only.
//!
//! Both entry points plan the input into blocks, encode the blocks on the
//! session's worker pool in waves bounded by the concurrency limit and the
//! memory budget, and publish the layout only after every block succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use rqblock_codec::Codec;
use rqblock_core::planner::{self, BlockPlan};
use rqblock_core::{EngineError, Result, Session};

use crate::chunker::BlockReader;
use crate::layout::{Layout, LayoutStore};
use crate::processor::{BlockProcessor, ProcessedBlock};
use crate::symbol_store::SymbolStore;

/// Name of the layout document written next to the symbols
pub const LAYOUT_FILE_NAME: &str = "_raptorq_layout.json";

/// Per-block summary in a [`ProcessResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// 0-based sequence number
    pub block_id: u64,
    /// Codec parameters for the block
    pub encoder_parameters: Vec<u8>,
    /// Byte offset in the original file
    pub original_offset: u64,
    /// Length in bytes
    pub size: u64,
    /// Source plus repair symbols
    pub symbols_count: u64,
    /// Source symbols only
    pub source_symbols_count: u64,
    /// BLAKE3 hex digest of the block
    pub hash: String,
}

impl From<&ProcessedBlock> for BlockSummary {
    fn from(block: &ProcessedBlock) -> Self {
        Self {
            block_id: block.record.block_id,
            encoder_parameters: block.record.encoder_parameters.clone(),
            original_offset: block.record.original_offset,
            size: block.record.size,
            symbols_count: block.symbol_count() as u64,
            source_symbols_count: block.source_symbols as u64,
            hash: block.record.hash.clone(),
        }
    }
}

/// Report of an encode or metadata operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Symbols across all blocks
    pub total_symbols_count: u64,
    /// Repair symbols across all blocks
    pub total_repair_symbols: u64,
    /// Directory holding the symbols; empty when none were written
    pub symbols_directory: String,
    /// Block summaries in `block_id` order
    pub blocks: Vec<BlockSummary>,
    /// Published layout document
    pub layout_file_path: String,
}

impl ProcessResult {
    fn new(blocks: &[ProcessedBlock], symbols_directory: Option<&Path>, layout: &Path) -> Self {
        Self {
            total_symbols_count: blocks.iter().map(|b| b.symbol_count() as u64).sum(),
            total_repair_symbols: blocks.iter().map(|b| b.repair_symbols as u64).sum(),
            symbols_directory: symbols_directory
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            blocks: blocks.iter().map(BlockSummary::from).collect(),
            layout_file_path: layout.display().to_string(),
        }
    }

    /// Serialize to compact JSON
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

/// Encodes whole files through a session
#[derive(Debug, Clone)]
pub struct FileEncoder {
    processor: BlockProcessor,
}

impl FileEncoder {
    /// Create an encoder around a codec
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            processor: BlockProcessor::new(codec),
        }
    }

    /// Encode `input` into symbol files under `output_dir`
    ///
    /// The layout is written to [`LAYOUT_FILE_NAME`] inside `output_dir`. A
    /// `block_size` of 0 selects the session's recommended size.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::SessionClosed`] before any I/O if the session
    /// is closed, [`EngineError::NotFound`] if the input is missing, or the
    /// first per-block error. No layout is published on failure.
    pub fn encode_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        session: &Session,
        input: P,
        output_dir: Q,
        block_size: u64,
    ) -> Result<ProcessResult> {
        let (input, output_dir) = (input.as_ref(), output_dir.as_ref());
        require_path("input path", input)?;
        require_path("output directory", output_dir)?;
        session.ensure_open()?;

        let reader = open_input(input)?;
        let plan = plan_input(session, &reader, block_size)?;
        let store = SymbolStore::create(output_dir)?;
        let layout_path = output_dir.join(LAYOUT_FILE_NAME);

        let result = self
            .encode_blocks(session, &reader, &plan, Some(&store))
            .and_then(|blocks| {
                publish_layout(&layout_path, &blocks)?;
                Ok(ProcessResult::new(&blocks, Some(store.dir()), &layout_path))
            });

        match &result {
            Ok(report) => tracing::info!(
                "Encoded {} into {} blocks, {} symbols ({} repair) in {}",
                input.display(),
                report.blocks.len(),
                report.total_symbols_count,
                report.total_repair_symbols,
                output_dir.display()
            ),
            Err(e) => tracing::error!("Encoding {} failed: {}", input.display(), e),
        }
        result
    }

    /// Compute the layout of `input` without writing any symbols
    ///
    /// The layout is identical to the one [`FileEncoder::encode_file`] would
    /// publish for the same input and session parameters.
    ///
    /// # Errors
    ///
    /// As [`FileEncoder::encode_file`], plus [`EngineError::InvalidPath`] if
    /// `layout_path` is a directory.
    pub fn create_metadata<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        session: &Session,
        input: P,
        layout_path: Q,
        block_size: u64,
    ) -> Result<ProcessResult> {
        let (input, layout_path) = (input.as_ref(), layout_path.as_ref());
        require_path("input path", input)?;
        require_path("layout path", layout_path)?;
        session.ensure_open()?;
        if layout_path.is_dir() || layout_path.file_name().is_none() {
            return Err(EngineError::InvalidPath(layout_path.to_path_buf()));
        }

        let reader = open_input(input)?;
        let plan = plan_input(session, &reader, block_size)?;
        let result = self
            .encode_blocks(session, &reader, &plan, None)
            .and_then(|blocks| {
                publish_layout(layout_path, &blocks)?;
                Ok(ProcessResult::new(&blocks, None, layout_path))
            });

        match &result {
            Ok(report) => tracing::info!(
                "Computed layout of {} ({} blocks, {} symbols) at {}",
                input.display(),
                report.blocks.len(),
                report.total_symbols_count,
                layout_path.display()
            ),
            Err(e) => tracing::error!("Layout of {} failed: {}", input.display(), e),
        }
        result
    }

    fn encode_blocks(
        &self,
        session: &Session,
        reader: &BlockReader,
        plan: &ResolvedPlan,
        sink: Option<&SymbolStore>,
    ) -> Result<Vec<ProcessedBlock>> {
        let ResolvedPlan { plan, workers } = plan;
        let resources = session.resources()?;
        let config = resources.config();

        let mut blocks = Vec::with_capacity(plan.block_count());
        for wave in plan.spans.chunks(*workers) {
            let done = resources.install(|| {
                wave.par_iter()
                    .map(|span| {
                        let _admitted =
                            resources.admit_block(planner::block_footprint(config, span.size))?;
                        let data = reader
                            .read_span(span)
                            .map_err(|e| EngineError::block_io(span.block_id, e))?;
                        self.processor.process_block(session, &data, *span, sink)
                    })
                    .collect::<Result<Vec<_>>>()
            })?;
            blocks.extend(done);
        }

        Ok(blocks)
    }
}

struct ResolvedPlan {
    plan: BlockPlan,
    workers: usize,
}

/// Plan the input and size the worker waves before any output is touched
fn plan_input(session: &Session, reader: &BlockReader, block_size: u64) -> Result<ResolvedPlan> {
    let config = session.config();
    let plan = BlockPlan::for_file(config, reader.total_size(), block_size);
    let workers = plan.workers(config)?;

    tracing::debug!(
        "Planned {} bytes as {} blocks of {} bytes, {} workers",
        plan.file_size,
        plan.block_count(),
        plan.block_size,
        workers
    );
    Ok(ResolvedPlan { plan, workers })
}

fn require_path(what: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(EngineError::InvalidArgument(format!("{what} is empty")));
    }
    Ok(())
}

fn open_input(input: &Path) -> Result<BlockReader> {
    let metadata = fs::metadata(input).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound(input.to_path_buf())
        } else {
            EngineError::Io(e)
        }
    })?;
    if !metadata.is_file() {
        return Err(EngineError::InvalidPath(input.to_path_buf()));
    }
    Ok(BlockReader::open(input)?)
}

fn publish_layout(path: &Path, blocks: &[ProcessedBlock]) -> Result<()> {
    let layout = Layout::new(blocks.iter().map(|b| b.record.clone()).collect());
    LayoutStore::write(path, &layout)
}

/// Default layout location for an encode into `output_dir`
#[must_use]
pub fn layout_path_in(output_dir: &Path) -> PathBuf {
    output_dir.join(LAYOUT_FILE_NAME)
}
