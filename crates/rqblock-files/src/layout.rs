//! Layout document: the cross-block index needed to decode a file.
//!
//! A layout lists every block of an encoded file in `block_id` order with its
//! offset, size, opaque encoder parameters, symbol identifiers and BLAKE3
//! hash. It is the only input besides the symbol directory that decoding
//! needs.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use rqblock_core::{BlockSpan, EngineError, Result};

use crate::chunker::temp_sibling;
use crate::symbol_store::is_valid_symbol_id;

/// One block of an encoded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// 0-based sequence number
    pub block_id: u64,
    /// Codec parameters, passed back to the codec verbatim
    pub encoder_parameters: Vec<u8>,
    /// Byte offset in the original file
    pub original_offset: u64,
    /// Length in bytes
    pub size: u64,
    /// Symbol identifiers, source symbols first
    pub symbols: Vec<String>,
    /// BLAKE3 hex digest of the block's original bytes
    pub hash: String,
}

impl BlockRecord {
    /// Byte range covered by this block
    #[must_use]
    pub fn span(&self) -> BlockSpan {
        BlockSpan {
            block_id: self.block_id,
            offset: self.original_offset,
            size: self.size,
        }
    }
}

/// Ordered list of block records
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Layout {
    /// Blocks in `block_id` order
    pub blocks: Vec<BlockRecord>,
}

impl Layout {
    /// Build a layout, sorting blocks by id
    #[must_use]
    pub fn new(mut blocks: Vec<BlockRecord>) -> Self {
        blocks.sort_by_key(|b| b.block_id);
        Self { blocks }
    }

    /// Size of the original file
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.blocks.last().map_or(0, |b| b.original_offset + b.size)
    }

    /// Total number of symbol identifiers across all blocks
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.blocks.iter().map(|b| b.symbols.len()).sum()
    }

    /// Block spans in order
    #[must_use]
    pub fn spans(&self) -> Vec<BlockSpan> {
        self.blocks.iter().map(BlockRecord::span).collect()
    }

    /// Check structural invariants
    ///
    /// Block ids must run 0, 1, 2, ... and the blocks must partition
    /// `[0, file_size)` without gaps or overlaps. Only a single-block layout
    /// may contain an empty block. Hashes and symbol identifiers must be
    /// well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(invalid("layout contains no blocks"));
        }

        let mut expected_offset = 0u64;
        for (index, block) in self.blocks.iter().enumerate() {
            if block.block_id != index as u64 {
                return Err(invalid(format!(
                    "block at position {index} has id {}",
                    block.block_id
                )));
            }
            if block.original_offset != expected_offset {
                return Err(invalid(format!(
                    "block {} starts at {}, expected {}",
                    block.block_id, block.original_offset, expected_offset
                )));
            }
            if block.size == 0 && self.blocks.len() > 1 {
                return Err(invalid(format!("block {} is empty", block.block_id)));
            }
            if block.encoder_parameters.is_empty() {
                return Err(invalid(format!(
                    "block {} has no encoder parameters",
                    block.block_id
                )));
            }
            if !is_valid_symbol_id(&block.hash) {
                return Err(invalid(format!(
                    "block {} has malformed hash {:?}",
                    block.block_id, block.hash
                )));
            }
            if let Some(bad) = block.symbols.iter().find(|id| !is_valid_symbol_id(id)) {
                return Err(invalid(format!(
                    "block {} references malformed symbol {bad:?}",
                    block.block_id
                )));
            }

            expected_offset = expected_offset.checked_add(block.size).ok_or_else(|| {
                invalid(format!("block {} overflows the file size", block.block_id))
            })?;
        }

        Ok(())
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Parse and validate a JSON layout
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Serialization`] if the document is malformed or
    /// fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let layout: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Serialization(format!("invalid layout: {}", message.into()))
}

/// Persistence of layout documents
pub struct LayoutStore;

impl LayoutStore {
    /// Publish a layout at `path`
    ///
    /// The document is written to a temporary sibling, synced and renamed into
    /// place, so readers observe either the previous file or the complete new
    /// one. Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPath`] if `path` is a directory or has no
    /// file name, [`EngineError::Serialization`] if the layout is invalid, or
    /// [`EngineError::Io`] if writing fails.
    pub fn write<P: AsRef<Path>>(path: P, layout: &Layout) -> Result<()> {
        let path = path.as_ref();
        if path.is_dir() || path.file_name().is_none() {
            return Err(EngineError::InvalidPath(path.to_path_buf()));
        }

        layout.validate()?;
        let json = layout.to_json()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = temp_sibling(path)?;
        let written = write_synced(&temp, json.as_bytes()).and_then(|()| fs::rename(&temp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        tracing::debug!(
            "Wrote layout {} ({} blocks, {} symbols)",
            path.display(),
            layout.blocks.len(),
            layout.symbol_count()
        );
        Ok(())
    }

    /// Read and validate the layout at `path`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the file does not exist,
    /// [`EngineError::Io`] if it cannot be read, and
    /// [`EngineError::Serialization`] if it is malformed or invalid.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Layout> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                EngineError::NotFound(path.to_path_buf())
            } else {
                EngineError::Io(e)
            }
        })?;
        Layout::from_json(&json)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
