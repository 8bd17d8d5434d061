//! Encode and metadata entry points

use std::os::raw::c_char;

use rqblock_files::ProcessResult;

use crate::error::{FfiError, Operation, RQ_SUCCESS};
use crate::{SessionHandle, engine, ffi_try, open_handle, str_arg, write_c_buffer};

/// Encode a file into symbols under `output_dir`
///
/// On success the result JSON is written to `result_buffer`. A
/// `block_size` of 0 lets the session pick one.
///
/// # Safety
///
/// Path arguments must be null or NUL-terminated strings, and
/// `result_buffer` must be null or valid for writes of `result_buffer_len`
/// bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_encode_file(
    session_id: usize,
    input_path: *const c_char,
    output_dir: *const c_char,
    block_size: usize,
    result_buffer: *mut c_char,
    result_buffer_len: usize,
) -> i32 {
    let handle = ffi_try!(open_handle(session_id), None);
    // SAFETY: forwarded caller contract
    let input = ffi_try!(unsafe { str_arg(input_path, "input_path") }, Some(&*handle));
    let output = ffi_try!(unsafe { str_arg(output_dir, "output_dir") }, Some(&*handle));

    let result = ffi_try!(
        engine()
            .encode_file(&handle.session, input, output, block_size as u64)
            .map_err(|e| FfiError::engine(Operation::Encode, e)),
        Some(&*handle)
    );

    // SAFETY: forwarded caller contract
    unsafe {
        write_result(
            &handle,
            Operation::Encode,
            &result,
            result_buffer,
            result_buffer_len,
        )
    }
}

/// Compute the layout of a file without writing symbols
///
/// The layout is written to `layout_file` and the result JSON, with an
/// empty `symbols_directory`, to `result_buffer`.
///
/// # Safety
///
/// Same contract as [`raptorq_encode_file`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn raptorq_create_metadata(
    session_id: usize,
    input_path: *const c_char,
    layout_file: *const c_char,
    block_size: usize,
    result_buffer: *mut c_char,
    result_buffer_len: usize,
) -> i32 {
    let handle = ffi_try!(open_handle(session_id), None);
    // SAFETY: forwarded caller contract
    let input = ffi_try!(unsafe { str_arg(input_path, "input_path") }, Some(&*handle));
    let layout = ffi_try!(unsafe { str_arg(layout_file, "layout_file") }, Some(&*handle));

    let result = ffi_try!(
        engine()
            .create_metadata(&handle.session, input, layout, block_size as u64)
            .map_err(|e| FfiError::engine(Operation::Metadata, e)),
        Some(&*handle)
    );

    // SAFETY: forwarded caller contract
    unsafe {
        write_result(
            &handle,
            Operation::Metadata,
            &result,
            result_buffer,
            result_buffer_len,
        )
    }
}

/// Serialize `result` into the caller buffer, attributing failures to `operation`
///
/// # Safety
///
/// `buffer` must be null or valid for writes of `len` bytes.
unsafe fn write_result(
    handle: &SessionHandle,
    operation: Operation,
    result: &ProcessResult,
    buffer: *mut c_char,
    len: usize,
) -> i32 {
    let json = ffi_try!(
        result
            .to_json()
            .map_err(|e| FfiError::engine(operation, e)),
        Some(handle)
    );

    // SAFETY: forwarded caller contract
    ffi_try!(unsafe { write_c_buffer(buffer, len, &json) }, Some(handle));
    RQ_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{
        RQ_ERROR_BUFFER_TOO_SMALL, RQ_ERROR_INVALID_PARAMETERS, RQ_ERROR_INVALID_SESSION,
        RQ_ERROR_NOT_FOUND,
    };
    use crate::session::{raptorq_free_session, raptorq_init_session};
    use std::ffi::{CStr, CString};
    use tempfile::tempdir;

    fn c_path(path: &std::path::Path) -> CString {
        CString::new(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_encode_writes_result_json() {
        let id = raptorq_init_session(1024, 2, 64, 2);
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, vec![0x5au8; 20_000]).unwrap();
        let symbols = dir.path().join("symbols");

        let mut buffer = vec![0 as c_char; 64 * 1024];
        let code = unsafe {
            raptorq_encode_file(
                id,
                c_path(&input).as_ptr(),
                c_path(&symbols).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_SUCCESS);

        let json = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_str().unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert!(value["total_symbols_count"].as_u64().unwrap() > 0);
        assert_eq!(value["blocks"].as_array().unwrap().len(), 1);
        assert!(symbols.join(rqblock_files::LAYOUT_FILE_NAME).exists());

        assert!(raptorq_free_session(id));
    }

    #[test]
    fn test_encode_small_buffer() {
        let id = raptorq_init_session(1024, 2, 64, 2);
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, vec![1u8; 5000]).unwrap();

        let mut buffer = [0 as c_char; 8];
        let code = unsafe {
            raptorq_encode_file(
                id,
                c_path(&input).as_ptr(),
                c_path(&dir.path().join("symbols")).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_ERROR_BUFFER_TOO_SMALL);
        assert!(raptorq_free_session(id));
    }

    #[test]
    fn test_metadata_codes() {
        let id = raptorq_init_session(1024, 2, 64, 2);
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, vec![7u8; 3000]).unwrap();
        let layout = dir.path().join("layout.json");
        let mut buffer = vec![0 as c_char; 16 * 1024];

        let code = unsafe {
            raptorq_create_metadata(
                id,
                c_path(&input).as_ptr(),
                c_path(&layout).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_SUCCESS);
        let json = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_str().unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["symbols_directory"], "");
        assert!(layout.exists());

        // Layout path naming a directory
        let code = unsafe {
            raptorq_create_metadata(
                id,
                c_path(&input).as_ptr(),
                c_path(dir.path()).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, -13);

        let code = unsafe {
            raptorq_create_metadata(
                id,
                c_path(&dir.path().join("missing.bin")).as_ptr(),
                c_path(&layout).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_ERROR_NOT_FOUND);

        let code = unsafe {
            raptorq_create_metadata(
                id,
                std::ptr::null(),
                c_path(&layout).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_ERROR_INVALID_PARAMETERS);

        assert!(raptorq_free_session(id));
        let code = unsafe {
            raptorq_create_metadata(
                id,
                c_path(&input).as_ptr(),
                c_path(&layout).as_ptr(),
                0,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_ERROR_INVALID_SESSION);
    }

    #[test]
    fn test_write_result_records_failure_on_handle() {
        let id = raptorq_init_session(1024, 2, 64, 2);
        let handle = crate::lookup(id).unwrap();
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, vec![3u8; 2000]).unwrap();
        let result = engine()
            .create_metadata(&handle.session, &input, dir.path().join("layout.json"), 0)
            .unwrap();

        let mut tiny = [0 as c_char; 4];
        let code = unsafe {
            write_result(&handle, Operation::Metadata, &result, tiny.as_mut_ptr(), tiny.len())
        };
        assert_eq!(code, RQ_ERROR_BUFFER_TOO_SMALL);
        assert!(handle.last_error().unwrap().contains("too small"));

        let mut buffer = vec![0 as c_char; 16 * 1024];
        let code = unsafe {
            write_result(
                &handle,
                Operation::Metadata,
                &result,
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };
        assert_eq!(code, RQ_SUCCESS);
        let json = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_str().unwrap();
        assert_eq!(json, result.to_json().unwrap());

        assert!(raptorq_free_session(id));
    }
}
