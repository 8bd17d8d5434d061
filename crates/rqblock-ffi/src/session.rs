//! Session lifecycle, diagnostics and logging entry points

use std::os::raw::c_char;

use rqblock_core::SessionConfig;
use tracing_subscriber::EnvFilter;

use crate::error::{RQ_ERROR_INVALID_PARAMETERS, RQ_SUCCESS};
use crate::{
    VERSION, detached_error, engine, fail, insert_handle, lookup, record_detached, remove_handle,
    str_arg, write_c_buffer,
};

/// Open a session and return its handle, or 0 on failure
///
/// `max_memory_mb` is the per-session memory budget in megabytes.
#[unsafe(no_mangle)]
pub extern "C" fn raptorq_init_session(
    symbol_size: u16,
    redundancy_factor: u8,
    max_memory_mb: u64,
    concurrency_limit: u64,
) -> usize {
    let opened = SessionConfig::from_megabytes(
        symbol_size,
        redundancy_factor,
        max_memory_mb,
        concurrency_limit,
    )
    .and_then(|config| engine().open_session(config));

    match opened {
        Ok(session) => insert_handle(session),
        Err(e) => {
            tracing::warn!("Failed to open session: {}", e);
            record_detached(e.to_string());
            0
        }
    }
}

/// Close a session and release its resources
///
/// Returns false if the handle is unknown or was already freed.
#[unsafe(no_mangle)]
pub extern "C" fn raptorq_free_session(session_id: usize) -> bool {
    match remove_handle(session_id) {
        Some(handle) => handle.session.close(),
        None => false,
    }
}

/// Recommended block size for a file, or 0 for an invalid session
#[unsafe(no_mangle)]
pub extern "C" fn raptorq_get_recommended_block_size(session_id: usize, file_size: u64) -> usize {
    let Some(handle) = lookup(session_id) else {
        return 0;
    };
    let block_size = engine().recommended_block_size(&handle.session, file_size);
    usize::try_from(block_size).unwrap_or(usize::MAX)
}

/// Copy the last error message for a session into `error_buffer`
///
/// Unknown handles (including 0) report the last failure not tied to a
/// live session. An empty string is written when no error was recorded.
///
/// # Safety
///
/// `error_buffer` must be null or valid for writes of `error_buffer_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_get_last_error(
    session_id: usize,
    error_buffer: *mut c_char,
    error_buffer_len: usize,
) -> i32 {
    let message = match lookup(session_id) {
        Some(handle) => handle.last_error(),
        None => detached_error(),
    }
    .unwrap_or_default();

    // SAFETY: forwarded caller contract
    match unsafe { write_c_buffer(error_buffer, error_buffer_len, &message) } {
        Ok(()) => RQ_SUCCESS,
        Err(e) => e.code(),
    }
}

/// Copy the library version into `version_buffer`
///
/// # Safety
///
/// `version_buffer` must be null or valid for writes of `version_buffer_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_version(
    version_buffer: *mut c_char,
    version_buffer_len: usize,
) -> i32 {
    let version = format!("rq-library {VERSION}");
    // SAFETY: forwarded caller contract
    match unsafe { write_c_buffer(version_buffer, version_buffer_len, &version) } {
        Ok(()) => RQ_SUCCESS,
        Err(e) => e.code(),
    }
}

/// Install a formatted log subscriber
///
/// `level` is an `EnvFilter` directive such as `"info"` or
/// `"rqblock_files=debug"`; null selects `"info"`. `RUST_LOG` takes
/// precedence when set. Calling this again after a subscriber is installed
/// has no effect.
///
/// # Safety
///
/// `level` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_init_logging(level: *const c_char) -> i32 {
    let level = if level.is_null() {
        "info"
    } else {
        // SAFETY: non-null and NUL-terminated per the caller contract
        match unsafe { str_arg(level, "level") } {
            Ok(level) => level,
            Err(e) => return fail(None, e),
        }
    };

    let filter = match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level)) {
        Ok(filter) => filter,
        Err(e) => {
            record_detached(format!("Invalid log level {level:?}: {e}"));
            return RQ_ERROR_INVALID_PARAMETERS;
        }
    };

    // Already installed, by us or by the host
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    RQ_SUCCESS
}
