//! Decode entry point

use std::os::raw::c_char;

use crate::error::{FfiError, Operation, RQ_SUCCESS};
use crate::{engine, ffi_try, open_handle, str_arg};

/// Reconstruct `output_path` from the symbols in `symbols_dir`
///
/// # Safety
///
/// Path arguments must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_decode_symbols(
    session_id: usize,
    symbols_dir: *const c_char,
    output_path: *const c_char,
    layout_path: *const c_char,
) -> i32 {
    let handle = ffi_try!(open_handle(session_id), None);
    // SAFETY: forwarded caller contract
    let symbols = ffi_try!(unsafe { str_arg(symbols_dir, "symbols_dir") }, Some(&*handle));
    let output = ffi_try!(unsafe { str_arg(output_path, "output_path") }, Some(&*handle));
    let layout = ffi_try!(unsafe { str_arg(layout_path, "layout_path") }, Some(&*handle));

    let report = ffi_try!(
        engine()
            .decode(&handle.session, symbols, output, layout)
            .map_err(|e| FfiError::engine(Operation::Decode, e)),
        Some(&*handle)
    );
    tracing::debug!(
        "Session {} decoded {} blocks ({} bytes)",
        handle.session.id(),
        report.blocks,
        report.bytes_written
    );
    RQ_SUCCESS
}
