//! Codec error types.

use thiserror::Error;

/// Errors raised by a [`Codec`](crate::Codec) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Encoding parameters are malformed or unsupported.
    #[error("invalid encoder parameters: {0}")]
    InvalidParameters(String),

    /// Not enough symbols to reconstruct the block.
    #[error("insufficient symbols: received {received}, need at least {required}")]
    InsufficientSymbols {
        /// Number of usable symbols supplied.
        received: usize,
        /// Minimum number required.
        required: usize,
    },

    /// A symbol could not be interpreted.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The input could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Reconstruction produced unexpected output.
    #[error("decoding failed: {0}")]
    Decoding(String),
}
