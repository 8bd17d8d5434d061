//! File-level decoding from a symbol directory and a layout document.
//!
//! Blocks are reconstructed on the session's worker pool and written into a
//! [`BlockAssembler`]. The output path only appears once every block has been
//! decoded and verified against its recorded hash.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use rqblock_codec::{Codec, CodecError};
use rqblock_core::planner::{self, BlockPlan};
use rqblock_core::{EngineError, Result, Session};

use crate::chunker::BlockAssembler;
use crate::layout::{BlockRecord, LayoutStore};
use crate::processor::block_hash;
use crate::symbol_store::{SymbolLookup, SymbolStore};

/// Summary of a successful decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeReport {
    /// Blocks reconstructed
    pub blocks: usize,
    /// Bytes written to the output
    pub bytes_written: u64,
    /// Intact symbols handed to the codec
    pub symbols_used: usize,
    /// Missing or corrupt symbols skipped
    pub symbols_skipped: usize,
}

#[derive(Debug, Default)]
struct BlockOutcome {
    symbols_used: usize,
    symbols_skipped: usize,
}

/// Reconstructs files through a session
#[derive(Clone)]
pub struct FileDecoder {
    codec: Arc<dyn Codec>,
}

impl FileDecoder {
    /// Create a decoder around a codec
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Reconstruct the file described by `layout_path` into `output_path`
    ///
    /// Missing and corrupt symbols are skipped with a warning. An existing
    /// file at `output_path` is replaced only on success.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] for empty paths,
    /// [`EngineError::SessionClosed`] before any I/O if the session is closed,
    /// [`EngineError::NotFound`] if the layout or symbol directory is missing,
    /// and otherwise the first per-block failure, such as
    /// [`EngineError::InsufficientSymbols`] or
    /// [`EngineError::IntegrityViolation`]. The output path is never created
    /// on failure.
    pub fn decode<P, Q, R>(
        &self,
        session: &Session,
        symbols_dir: P,
        output_path: Q,
        layout_path: R,
    ) -> Result<DecodeReport>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let (symbols_dir, output_path, layout_path) =
            (symbols_dir.as_ref(), output_path.as_ref(), layout_path.as_ref());
        for (what, path) in [
            ("symbols directory", symbols_dir),
            ("output path", output_path),
            ("layout path", layout_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(EngineError::InvalidArgument(format!("{what} is empty")));
            }
        }
        session.ensure_open()?;

        let result = self.decode_file(session, symbols_dir, output_path, layout_path);
        match &result {
            Ok(report) => tracing::info!(
                "Decoded {} blocks ({} bytes) into {} using {} symbols, {} skipped",
                report.blocks,
                report.bytes_written,
                output_path.display(),
                report.symbols_used,
                report.symbols_skipped
            ),
            Err(e) => tracing::error!("Decoding into {} failed: {}", output_path.display(), e),
        }
        result
    }

    fn decode_file(
        &self,
        session: &Session,
        symbols_dir: &Path,
        output_path: &Path,
        layout_path: &Path,
    ) -> Result<DecodeReport> {
        let layout = LayoutStore::read(layout_path)?;
        let store = SymbolStore::open(symbols_dir)?;
        if output_path.is_dir() {
            return Err(EngineError::InvalidPath(output_path.to_path_buf()));
        }

        let resources = session.resources()?;
        let config = resources.config();
        let plan = BlockPlan::from_spans(layout.spans());
        let workers = plan.workers(config)?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let assembler = BlockAssembler::new(output_path, plan.spans.clone())?;

        let mut report = DecodeReport::default();
        for wave in layout.blocks.chunks(workers) {
            let outcomes = resources.install(|| {
                wave.par_iter()
                    .map(|block| {
                        session.ensure_open()?;
                        let _admitted =
                            resources.admit_block(planner::block_footprint(config, block.size))?;
                        let (data, outcome) = self.decode_block(&store, block)?;
                        assembler
                            .write_block(block.block_id, &data)
                            .map_err(|e| EngineError::block_io(block.block_id, e))?;
                        Ok(outcome)
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            for outcome in outcomes {
                report.blocks += 1;
                report.symbols_used += outcome.symbols_used;
                report.symbols_skipped += outcome.symbols_skipped;
            }
        }

        report.bytes_written = assembler.total_size();
        assembler.finalize()?;
        Ok(report)
    }

    fn decode_block(
        &self,
        store: &SymbolStore,
        block: &BlockRecord,
    ) -> Result<(Vec<u8>, BlockOutcome)> {
        let block_id = block.block_id;
        let required = self
            .codec
            .required_symbols(&block.encoder_parameters)
            .map_err(|e| EngineError::Decoding {
                block_id,
                reason: e.to_string(),
            })?;

        let mut symbols = Vec::with_capacity(block.symbols.len());
        let mut missing = 0usize;
        let mut corrupt = 0usize;
        for id in &block.symbols {
            match store.read(id).map_err(|e| EngineError::block_io(block_id, e))? {
                SymbolLookup::Found(bytes) => symbols.push(bytes),
                SymbolLookup::Missing => missing += 1,
                SymbolLookup::Corrupt { actual } => {
                    tracing::warn!(
                        "Block {}: skipping corrupt symbol {} (content hashes to {})",
                        block_id,
                        id,
                        actual
                    );
                    corrupt += 1;
                }
            }
        }
        if missing > 0 {
            tracing::warn!(
                "Block {}: {} of {} symbols missing",
                block_id,
                missing,
                block.symbols.len()
            );
        }

        if symbols.len() < required {
            return Err(EngineError::InsufficientSymbols {
                block_id,
                available: symbols.len(),
                required,
            });
        }

        let data = self
            .codec
            .decode(&block.encoder_parameters, &symbols)
            .map_err(|e| match e {
                CodecError::InsufficientSymbols { received, required } => {
                    EngineError::InsufficientSymbols {
                        block_id,
                        available: received,
                        required,
                    }
                }
                other => EngineError::Decoding {
                    block_id,
                    reason: other.to_string(),
                },
            })?;

        if data.len() as u64 != block.size {
            return Err(EngineError::Decoding {
                block_id,
                reason: format!("reconstructed {} bytes, expected {}", data.len(), block.size),
            });
        }

        let actual = block_hash(&data);
        if actual != block.hash {
            return Err(EngineError::IntegrityViolation {
                block_id,
                expected: block.hash.clone(),
                actual,
            });
        }

        tracing::debug!(
            "Block {} reconstructed from {} symbols ({} required)",
            block_id,
            symbols.len(),
            required
        );

        Ok((
            data,
            BlockOutcome {
                symbols_used: symbols.len(),
                symbols_skipped: missing + corrupt,
            },
        ))
    }
}

impl std::fmt::Debug for FileDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDecoder")
            .field("codec", &self.codec.name())
            .finish()
    }
}
