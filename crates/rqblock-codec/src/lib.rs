//! # RQBLOCK Codec
//!
//! The per-block forward-error-correction primitive used by the RQBLOCK engine.
//!
//! This crate provides:
//! - The [`Codec`] trait, the only seam between the block/session engine and
//!   the FEC mathematics
//! - [`RaptorQCodec`], an RFC 6330 implementation backed by the `raptorq` crate
//!
//! The engine treats everything a codec produces as opaque: the encoder
//! parameter blob is stored and handed back verbatim, and symbols are stored
//! as uninterpreted byte strings. Only the codec understands either.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod raptor;

pub use error::CodecError;
pub use raptor::RaptorQCodec;

/// Output of encoding a single block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    /// Opaque parameters required verbatim at decode time.
    pub parameters: Vec<u8>,
    /// Symbols carrying the original data.
    pub source_symbols: Vec<Vec<u8>>,
    /// Redundancy symbols.
    pub repair_symbols: Vec<Vec<u8>>,
}

impl EncodedBlock {
    /// Total number of symbols (source + repair).
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.source_symbols.len() + self.repair_symbols.len()
    }

    /// Iterate over all symbols, source symbols first.
    pub fn symbols(&self) -> impl Iterator<Item = &[u8]> {
        self.source_symbols
            .iter()
            .chain(self.repair_symbols.iter())
            .map(Vec::as_slice)
    }
}

/// A block-level erasure codec.
///
/// Implementations must be deterministic for a given input and parameters,
/// and must be safe to call from several worker threads at once.
pub trait Codec: Send + Sync {
    /// Short human-readable codec name used in logs.
    fn name(&self) -> &'static str;

    /// Encode `data` into source and repair symbols.
    ///
    /// `redundancy_factor` is the number of repair symbols generated per
    /// source symbol.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the input or parameters are rejected.
    fn encode(
        &self,
        data: &[u8],
        symbol_size: u16,
        redundancy_factor: u8,
    ) -> Result<EncodedBlock, CodecError>;

    /// Reconstruct the original block from any sufficient subset of symbols.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InsufficientSymbols`] when the symbols cannot
    /// reconstruct the block, or another [`CodecError`] when the parameters or
    /// symbols are malformed.
    fn decode(&self, parameters: &[u8], symbols: &[Vec<u8>]) -> Result<Vec<u8>, CodecError>;

    /// Minimum number of symbols below which [`Codec::decode`] cannot succeed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameters`] if `parameters` is malformed.
    fn required_symbols(&self, parameters: &[u8]) -> Result<usize, CodecError>;
}
