//! # RQBLOCK FFI
//!
//! C ABI for the RQBLOCK engine.
//!
//! Sessions are exposed as non-zero numeric handles backed by one
//! process-wide session table. Every exported function validates its
//! pointers, records a failure message retrievable through
//! `raptorq_get_last_error`, and returns one of the codes in [`error`].
//! Strings returned to the caller are NUL-terminated and written into
//! caller-owned buffers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod session;

use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use rqblock_core::Session;
use rqblock_files::Engine;

use crate::error::FfiError;

/// Library version reported by `raptorq_version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A session owned by the C caller
pub(crate) struct SessionHandle {
    pub(crate) session: Session,
    last_error: Mutex<Option<String>>,
}

impl SessionHandle {
    fn record_error(&self, message: String) {
        *lock(&self.last_error) = Some(message);
    }

    fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

static ENGINE: LazyLock<Engine> = LazyLock::new(Engine::new);

static HANDLES: LazyLock<Mutex<HashMap<usize, Arc<SessionHandle>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Last failure not attributable to a live session
static DETACHED_ERROR: Mutex<Option<String>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn engine() -> &'static Engine {
    &ENGINE
}

/// Register a session and return its handle, or 0 if it cannot be represented
pub(crate) fn insert_handle(session: Session) -> usize {
    let Ok(id) = usize::try_from(session.id().as_raw()) else {
        record_detached("session id does not fit a C handle".into());
        return 0;
    };

    let handle = Arc::new(SessionHandle {
        session,
        last_error: Mutex::new(None),
    });
    lock(&HANDLES).insert(id, handle);
    id
}

pub(crate) fn lookup(session_id: usize) -> Option<Arc<SessionHandle>> {
    lock(&HANDLES).get(&session_id).cloned()
}

pub(crate) fn remove_handle(session_id: usize) -> Option<Arc<SessionHandle>> {
    lock(&HANDLES).remove(&session_id)
}

/// Look up an open session
pub(crate) fn open_handle(session_id: usize) -> Result<Arc<SessionHandle>, FfiError> {
    lookup(session_id).ok_or(FfiError::InvalidSession(session_id))
}

fn record_detached(message: String) {
    *lock(&DETACHED_ERROR) = Some(message);
}

pub(crate) fn detached_error() -> Option<String> {
    lock(&DETACHED_ERROR).clone()
}

/// Record `err` against `handle` (or the detached slot) and return its code
pub(crate) fn fail(handle: Option<&SessionHandle>, err: FfiError) -> i32 {
    let message = err.to_string();
    tracing::debug!("FFI call failed with code {}: {}", err.code(), message);
    match handle {
        Some(handle) => handle.record_error(message),
        None => record_detached(message),
    }
    err.code()
}

/// Unwrap a `Result`, or record the error and return its code
macro_rules! ffi_try {
    ($expr:expr, $handle:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return $crate::fail($handle, err.into()),
        }
    };
}
pub(crate) use ffi_try;

/// Borrow a C string argument
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer(name));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8(name))
}

/// Copy `value` plus a terminating NUL into a caller buffer
///
/// # Safety
///
/// `buffer` must be null or valid for writes of `len` bytes.
pub(crate) unsafe fn write_c_buffer(
    buffer: *mut c_char,
    len: usize,
    value: &str,
) -> Result<(), FfiError> {
    if buffer.is_null() {
        return Err(FfiError::NullPointer("buffer"));
    }

    let bytes = value.as_bytes();
    let needed = bytes.len() + 1;
    if needed > len {
        return Err(FfiError::BufferTooSmall {
            needed,
            available: len,
        });
    }

    // SAFETY: buffer is valid for `len >= needed` bytes per the caller contract
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.cast::<u8>(), bytes.len());
        *buffer.add(bytes.len()) = 0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_str_arg() {
        let value = CString::new("/tmp/input").unwrap();
        assert_eq!(unsafe { str_arg(value.as_ptr(), "input") }.unwrap(), "/tmp/input");
        assert!(matches!(
            unsafe { str_arg(std::ptr::null(), "input") },
            Err(FfiError::NullPointer("input"))
        ));

        let invalid = [0xffu8, 0xfe, 0];
        assert!(matches!(
            unsafe { str_arg(invalid.as_ptr().cast(), "input") },
            Err(FfiError::InvalidUtf8("input"))
        ));
    }

    #[test]
    fn test_write_c_buffer() {
        let mut buffer = [0x7f as c_char; 8];
        unsafe { write_c_buffer(buffer.as_mut_ptr(), buffer.len(), "abc") }.unwrap();
        let written = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        assert_eq!(written.to_str().unwrap(), "abc");

        // Exactly fits, including the NUL
        unsafe { write_c_buffer(buffer.as_mut_ptr(), buffer.len(), "1234567") }.unwrap();

        assert!(matches!(
            unsafe { write_c_buffer(buffer.as_mut_ptr(), buffer.len(), "12345678") },
            Err(FfiError::BufferTooSmall {
                needed: 9,
                available: 8
            })
        ));
        assert!(matches!(
            unsafe { write_c_buffer(std::ptr::null_mut(), 8, "x") },
            Err(FfiError::NullPointer(_))
        ));
    }
}
