//! FFI error codes and the error type behind them

use rqblock_core::{EngineError, ErrorKind};
use thiserror::Error;

/// Operation succeeded
pub const RQ_SUCCESS: i32 = 0;
/// Unclassified failure
pub const RQ_ERROR_GENERIC: i32 = -1;
/// Null pointer, invalid UTF-8, empty path or rejected configuration
pub const RQ_ERROR_INVALID_PARAMETERS: i32 = -2;
/// Result or layout JSON could not be produced or parsed
pub const RQ_ERROR_JSON: i32 = -3;
/// Caller buffer cannot hold the NUL-terminated result
pub const RQ_ERROR_BUFFER_TOO_SMALL: i32 = -4;
/// Unknown or closed session handle
pub const RQ_ERROR_INVALID_SESSION: i32 = -5;
/// Read or write failure
pub const RQ_ERROR_IO: i32 = -11;
/// Input, symbol directory or layout missing
pub const RQ_ERROR_NOT_FOUND: i32 = -12;

/// Exported operation an error occurred in
///
/// Codes from -13 on are assigned per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `raptorq_encode_file`
    Encode,
    /// `raptorq_create_metadata`
    Metadata,
    /// `raptorq_decode_symbols`
    Decode,
}

impl Operation {
    fn code_for(self, err: &EngineError) -> i32 {
        use Operation::{Decode, Encode, Metadata};

        match (self, err.kind()) {
            (_, ErrorKind::SessionClosed) => RQ_ERROR_INVALID_SESSION,
            (_, ErrorKind::InvalidConfiguration) => RQ_ERROR_INVALID_PARAMETERS,
            (Metadata, ErrorKind::InvalidArgument) if matches!(err, EngineError::InvalidPath(_)) => {
                -13
            }
            (_, ErrorKind::InvalidArgument) => RQ_ERROR_INVALID_PARAMETERS,
            (_, ErrorKind::SerializationFailure) => RQ_ERROR_JSON,
            (_, ErrorKind::IoFailure) => RQ_ERROR_IO,
            (_, ErrorKind::NotFound) => RQ_ERROR_NOT_FOUND,
            (Encode, ErrorKind::EncodingFailure) => -13,
            (Metadata, ErrorKind::EncodingFailure) => -14,
            (
                Decode,
                ErrorKind::DecodingFailure
                | ErrorKind::InsufficientSymbols
                | ErrorKind::IntegrityViolation,
            ) => -14,
            (Encode | Decode, ErrorKind::MemoryBudgetExceeded) => -15,
            (Metadata, ErrorKind::MemoryBudgetExceeded) => -16,
            (Encode | Decode, ErrorKind::ConcurrencyLimitExceeded) => -16,
            (Metadata, ErrorKind::ConcurrencyLimitExceeded) => -17,
            _ => RQ_ERROR_GENERIC,
        }
    }
}

/// Failure of an exported function
#[derive(Debug, Error)]
pub enum FfiError {
    /// Required pointer argument was null
    #[error("{0} is null")]
    NullPointer(&'static str),

    /// String argument was not UTF-8
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Output buffer too small
    #[error("Buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall {
        /// Bytes including the terminating NUL
        needed: usize,
        /// Caller-provided capacity
        available: usize,
    },

    /// Handle does not name an open session
    #[error("Invalid session {0}")]
    InvalidSession(usize),

    /// Engine failure
    #[error("{source}")]
    Engine {
        /// Operation that failed
        operation: Operation,
        /// Underlying error
        source: EngineError,
    },
}

impl FfiError {
    /// Wrap an engine error raised by `operation`
    pub fn engine(operation: Operation, source: EngineError) -> Self {
        Self::Engine { operation, source }
    }

    /// C return code
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NullPointer(_) | Self::InvalidUtf8(_) => RQ_ERROR_INVALID_PARAMETERS,
            Self::BufferTooSmall { .. } => RQ_ERROR_BUFFER_TOO_SMALL,
            Self::InvalidSession(_) => RQ_ERROR_INVALID_SESSION,
            Self::Engine { operation, source } => operation.code_for(source),
        }
    }
}
