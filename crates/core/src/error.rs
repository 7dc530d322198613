//! Error Handling
//!
//! Two layers live here:
//!
//! - [`CoreError`]: the typed error returned by every primitive in this crate
//!   (lock timeouts, the lock safety ceiling, payload allocation failure).
//! - A thread-local "last error" slot so `extern "C"` entry points can report
//!   a failure without panicking across the FFI boundary, while still handing
//!   the VM the sentinel value its polling contract expects.
//!
//! # Usage
//!
//! ```ignore
//! match scheduler.command(id, payload) {
//!     Ok(reply) => reply.into_wire(),
//!     Err(e) => {
//!         set_runtime_error(format!("command: {}", e));
//!         NOT_READY.to_vec()
//!     }
//! }
//! ```
//!
//! Callers on the C side check `posctx_has_error()` and take the message with
//! `posctx_take_error()`.

use std::cell::RefCell;
use std::collections::TryReserveError;
use std::ffi::{CString, c_char};
use std::ptr;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the locking and queueing primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A timed acquisition gave up before the lock was released
    #[error("lock not acquired within {0:?}")]
    TimedOut(Duration),

    /// An untimed acquisition waited past the safety ceiling
    #[error("lock wait exceeded the {0:?} safety ceiling")]
    CeilingExceeded(Duration),

    /// A payload copy could not be allocated
    #[error("failed to allocate {len} byte payload: {source}")]
    Alloc {
        len: usize,
        #[source]
        source: TryReserveError,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Copy `payload` into a freshly allocated buffer, reporting allocation
/// failure as a value.
pub fn copy_payload(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(payload.len())
        .map_err(|source| CoreError::Alloc {
            len: payload.len(),
            source,
        })?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

thread_local! {
    /// Thread-local storage for the last runtime error message
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };

    /// Cached C string for FFI access (avoids allocation on every get)
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last runtime error message
///
/// Note: This clears any cached CString to prevent stale pointer access.
pub fn set_runtime_error(msg: impl Into<String>) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg.into());
    });
}

/// Take (and clear) the last runtime error message
pub fn take_runtime_error() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Check if there's a pending runtime error
pub fn has_runtime_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

/// Clear any pending runtime error
pub fn clear_runtime_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// Cache `msg` as a C string and return a pointer into the cache.
fn cache_cstring(msg: &str) -> *const c_char {
    ERROR_CSTRING.with(|cs| {
        // Replace null bytes with '?' to preserve error content
        let safe_msg: String = msg
            .chars()
            .map(|c| if c == '\0' { '?' } else { c })
            .collect();
        let cstring = CString::new(safe_msg).unwrap_or_default();
        let ptr = cstring.as_ptr();
        *cs.borrow_mut() = Some(cstring);
        ptr
    })
}

// FFI-safe error access functions

/// Check if there's a pending runtime error (FFI-safe)
#[unsafe(no_mangle)]
pub extern "C" fn posctx_has_error() -> bool {
    has_runtime_error()
}

/// Get the last error message as a C string pointer (FFI-safe)
///
/// Returns null if no error is pending.
///
/// # WARNING: Pointer Lifetime
/// The returned pointer is only valid until the next call to `set_runtime_error`,
/// `get_error`, `take_error`, or `clear_error`. Callers must copy the string
/// immediately if they need to retain it.
#[unsafe(no_mangle)]
pub extern "C" fn posctx_get_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => cache_cstring(msg),
        None => ptr::null(),
    })
}

/// Take (and clear) the last error, returning it as a C string (FFI-safe)
///
/// Returns null if no error is pending. Same pointer lifetime rules as
/// [`posctx_get_error`].
#[unsafe(no_mangle)]
pub extern "C" fn posctx_take_error() -> *const c_char {
    match take_runtime_error() {
        Some(s) => cache_cstring(&s),
        None => ptr::null(),
    }
}

/// Clear any pending error (FFI-safe)
#[unsafe(no_mangle)]
pub extern "C" fn posctx_clear_error() {
    clear_runtime_error();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_set_and_take_error() {
        clear_runtime_error();
        assert!(!has_runtime_error());

        set_runtime_error("test error");
        assert!(has_runtime_error());

        let error = take_runtime_error();
        assert_eq!(error, Some("test error".to_string()));
        assert!(!has_runtime_error());
    }

    #[test]
    fn test_clear_error() {
        set_runtime_error("another error");
        assert!(has_runtime_error());

        clear_runtime_error();
        assert!(!has_runtime_error());
        assert!(take_runtime_error().is_none());
    }

    #[test]
    fn test_ffi_error_with_interior_nul() {
        clear_runtime_error();
        assert!(posctx_get_error().is_null());

        set_runtime_error("bad\0byte");
        let ptr = posctx_take_error();
        assert!(!ptr.is_null());
        let msg = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap();
        assert_eq!(msg, "bad?byte");
        assert!(!posctx_has_error());
    }

    #[test]
    fn test_copy_payload() {
        assert_eq!(copy_payload(b"ping").unwrap(), b"ping".to_vec());
        assert!(copy_payload(b"").unwrap().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::TimedOut(Duration::from_millis(20));
        assert_eq!(err.to_string(), "lock not acquired within 20ms");
    }
}
