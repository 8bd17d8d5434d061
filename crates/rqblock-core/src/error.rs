//! Error types for engine operations

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionId;

/// Broad classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Session configuration rejected
    InvalidConfiguration,
    /// Operation argument rejected
    InvalidArgument,
    /// Session closed or unknown
    SessionClosed,
    /// Input file, symbol directory or layout missing
    NotFound,
    /// Read or write failure
    IoFailure,
    /// Layout or result document malformed or unrepresentable
    SerializationFailure,
    /// Codec rejected the input
    EncodingFailure,
    /// Codec could not reconstruct a block
    DecodingFailure,
    /// Too few symbols to reconstruct a block
    InsufficientSymbols,
    /// Reconstructed block does not match its recorded hash
    IntegrityViolation,
    /// Block work would exceed the memory budget
    MemoryBudgetExceeded,
    /// Block work would exceed the concurrency limit
    ConcurrencyLimitExceeded,
}

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Session has been closed
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// Path argument is unusable for its role (a directory where a file is
    /// expected, or no file name)
    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Input path does not exist
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File I/O error while processing a block
    #[error("I/O error in block {block_id}: {source}")]
    BlockIo {
        /// Failing block
        block_id: u64,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization or document validation failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Codec rejected a block
    #[error("Encoding failed for block {block_id}: {reason}")]
    Encoding {
        /// Failing block
        block_id: u64,
        /// Codec message
        reason: String,
    },

    /// Codec failed to reconstruct a block
    #[error("Decoding failed for block {block_id}: {reason}")]
    Decoding {
        /// Failing block
        block_id: u64,
        /// Codec message
        reason: String,
    },

    /// Not enough symbols to reconstruct a block
    #[error(
        "Insufficient symbols for block {block_id}: {available} available, {required} required"
    )]
    InsufficientSymbols {
        /// Failing block
        block_id: u64,
        /// Usable symbols found
        available: usize,
        /// Minimum needed
        required: usize,
    },

    /// Reconstructed block hash mismatch
    #[error("Integrity violation in block {block_id}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        /// Failing block
        block_id: u64,
        /// Hash recorded in the layout
        expected: String,
        /// Hash of the reconstructed bytes
        actual: String,
    },

    /// Memory budget exceeded
    #[error("Memory budget exceeded: requested {requested} bytes with {in_use} of {budget} bytes in use")]
    MemoryBudgetExceeded {
        /// Bytes requested
        requested: u64,
        /// Bytes already reserved
        in_use: u64,
        /// Session budget
        budget: u64,
    },

    /// Concurrency limit exceeded
    #[error("Concurrency limit reached: {limit} block operations already in flight")]
    ConcurrencyLimitExceeded {
        /// Session limit
        limit: usize,
    },
}

impl EngineError {
    /// Wrap an I/O error raised while processing `block_id`
    pub fn block_io(block_id: u64, source: std::io::Error) -> Self {
        Self::BlockIo { block_id, source }
    }

    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfiguration,
            Self::InvalidArgument(_) | Self::InvalidPath(_) => ErrorKind::InvalidArgument,
            Self::SessionClosed(_) => ErrorKind::SessionClosed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(_) | Self::BlockIo { .. } => ErrorKind::IoFailure,
            Self::Serialization(_) => ErrorKind::SerializationFailure,
            Self::Encoding { .. } => ErrorKind::EncodingFailure,
            Self::Decoding { .. } => ErrorKind::DecodingFailure,
            Self::InsufficientSymbols { .. } => ErrorKind::InsufficientSymbols,
            Self::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            Self::MemoryBudgetExceeded { .. } => ErrorKind::MemoryBudgetExceeded,
            Self::ConcurrencyLimitExceeded { .. } => ErrorKind::ConcurrencyLimitExceeded,
        }
    }

    /// Block the failure belongs to, if any
    #[must_use]
    pub fn block_id(&self) -> Option<u64> {
        match self {
            Self::BlockIo { block_id, .. }
            | Self::Encoding { block_id, .. }
            | Self::Decoding { block_id, .. }
            | Self::InsufficientSymbols { block_id, .. }
            | Self::IntegrityViolation { block_id, .. } => Some(*block_id),
            _ => None,
        }
    }

    /// Whether retrying the same call later may succeed
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MemoryBudgetExceeded | ErrorKind::ConcurrencyLimitExceeded
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
