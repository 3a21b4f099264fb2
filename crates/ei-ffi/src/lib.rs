//! `ei-ffi` - C ABI for edge-inference.
//!
//! A host installs a model runtime once (from Rust, via [`install_runtime`]),
//! then drives sessions through opaque integer handles: `ei_open`,
//! `ei_complete` and `ei_close`. No panic or error crosses the boundary;
//! failures come back as a zero handle, an empty string or an [`EiStatus`],
//! with the message available from `ei_last_error`.

mod error;
mod global;
mod types;

pub use error::*;
pub use global::{cache_state, install_runtime};
pub use types::*;

use std::any::Any;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::UnwindSafe;

use ei_session::{GenerationLimits, SessionError, SessionParams, INVALID_HANDLE};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Run `f`, catching any panic so it never unwinds into the host.
///
/// Returns `None` after a panic; the message is kept as the last error.
fn catch_panic<T, F: FnOnce() -> T + UnwindSafe>(f: F) -> Option<T> {
    match std::panic::catch_unwind(f) {
        Ok(value) => Some(value),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(panic = %msg, "panic caught at the C boundary");
            set_last_error(format!("internal panic: {msg}"));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Borrow a C string argument as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, SessionError> {
    if ptr.is_null() {
        return Err(SessionError::InvalidArgument(format!("{name} is null")));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| SessionError::InvalidArgument(format!("{name} is not valid UTF-8: {e}")))
}

/// Hand a string to the host. Text after an interior NUL cannot be
/// represented in a C string and is dropped.
fn into_c_string(text: &str) -> *mut c_char {
    let text = text.split('\0').next().unwrap_or_default();
    CString::new(text).unwrap_or_default().into_raw()
}

fn empty_string() -> *mut c_char {
    CString::default().into_raw()
}

/// Open a session on the model at `model_path` (a path or `file://` URI).
///
/// `context_size` is clamped to [256, 4096] and `thread_count` to [1, 16].
/// Returns `0` on failure, including when no model runtime was installed
/// (see `install_runtime`; C hosts need a Rust shim to call it).
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ei_open(
    model_path: *const c_char,
    context_size: i32,
    thread_count: i32,
) -> EiHandle {
    catch_panic(|| {
        let opened = unsafe { str_arg(model_path, "model_path") }.and_then(|path| {
            let params = SessionParams::new(context_size, thread_count);
            global::sessions().open(global::backend()?, path, params)
        });
        match opened {
            Ok(handle) => {
                debug!(handle, "ei_open");
                handle
            }
            Err(e) => {
                report(&e);
                INVALID_HANDLE
            }
        }
    })
    .unwrap_or(INVALID_HANDLE)
}

/// Close a session. Unknown or already-closed handles are ignored.
#[no_mangle]
pub extern "C" fn ei_close(handle: EiHandle) {
    let _ = catch_panic(|| global::sessions().close(handle));
}

/// Whether `handle` refers to an open session.
#[no_mangle]
pub extern "C" fn ei_is_valid(handle: EiHandle) -> bool {
    catch_panic(|| global::sessions().is_valid(handle)).unwrap_or(false)
}

/// Complete `prompt` greedily, generating at most `max_tokens` tokens
/// (clamped to [1, 256]).
///
/// Always returns a string the caller must release with `ei_free_string`.
/// The string is empty on any failure; use `ei_complete_ex` to tell a
/// failure from an empty answer.
///
/// # Safety
/// `prompt` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ei_complete(
    handle: EiHandle,
    prompt: *const c_char,
    max_tokens: i32,
) -> *mut c_char {
    catch_panic(|| {
        let completed = unsafe { str_arg(prompt, "prompt") }.and_then(|prompt| {
            global::sessions().complete(handle, prompt, max_tokens, &GenerationLimits::default())
        });
        match completed {
            Ok(c) => into_c_string(&c.text),
            Err(e) => {
                report(&e);
                empty_string()
            }
        }
    })
    .unwrap_or_else(empty_string)
}

/// Like `ei_complete`, but reports a status and fills `*out` with the
/// text, termination reason, token counts and timings.
///
/// On failure `*out` holds a null text and `EI_TERMINATION_NONE`. Release
/// the result with `ei_completion_free`.
///
/// # Safety
/// `prompt` must be null or a valid NUL-terminated string; `out` must be
/// null or point to writable memory for one `EiCompletion`.
#[no_mangle]
pub unsafe extern "C" fn ei_complete_ex(
    handle: EiHandle,
    prompt: *const c_char,
    max_tokens: i32,
    out: *mut EiCompletion,
) -> EiStatus {
    catch_panic(|| {
        if out.is_null() {
            set_last_error("out is null".to_string());
            return EiStatus::ErrorInvalidArgument;
        }
        unsafe { out.write(EiCompletion::empty()) };

        let completed = unsafe { str_arg(prompt, "prompt") }.and_then(|prompt| {
            global::sessions().complete(handle, prompt, max_tokens, &GenerationLimits::default())
        });
        match completed {
            Ok(c) => {
                let filled = EiCompletion::from_report(&c, into_c_string(&c.text));
                unsafe { out.write(filled) };
                EiStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
    .unwrap_or(EiStatus::ErrorInternal)
}

/// Release the text of a completion filled by `ei_complete_ex`.
///
/// # Safety
/// `completion` must be null or point to an `EiCompletion` written by
/// `ei_complete_ex`.
#[no_mangle]
pub unsafe extern "C" fn ei_completion_free(completion: *mut EiCompletion) {
    if completion.is_null() {
        return;
    }
    let completion = unsafe { &mut *completion };
    if !completion.text.is_null() {
        drop(unsafe { CString::from_raw(completion.text) });
        completion.text = std::ptr::null_mut();
    }
}

/// Return a handle to an open session for `model_path`, reusing the
/// cached session when the same model is already open and replacing it
/// otherwise. Returns `0` on failure.
///
/// The cached handle is owned by the cache: release it with
/// `ei_cached_release`, not `ei_close`.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ei_cached_open(
    model_path: *const c_char,
    context_size: i32,
    thread_count: i32,
) -> EiHandle {
    catch_panic(|| {
        let opened = unsafe { str_arg(model_path, "model_path") }.and_then(|path| {
            let params = SessionParams::new(context_size, thread_count);
            global::cache().get_or_open(global::sessions(), global::backend()?, path, params)
        });
        match opened {
            Ok(handle) => handle,
            Err(e) => {
                report(&e);
                INVALID_HANDLE
            }
        }
    })
    .unwrap_or(INVALID_HANDLE)
}

/// Close the cached session. Returns false if nothing was cached.
#[no_mangle]
pub extern "C" fn ei_cached_release() -> bool {
    catch_panic(|| global::cache().release(global::sessions())).unwrap_or(false)
}

/// Take the calling thread's last error message, or null if there is none.
///
/// The caller must free the returned string with `ei_free_string`.
#[no_mangle]
pub extern "C" fn ei_last_error() -> *mut c_char {
    match take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string returned by `ei_complete` or `ei_last_error`.
///
/// # Safety
/// `s` must be null or a pointer returned by this library and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn ei_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Install a `tracing` subscriber writing to stderr, filtered by
/// `RUST_LOG` (default `info`).
///
/// Returns false if a global subscriber was already set.
#[no_mangle]
pub extern "C" fn ei_log_init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Once};

    use ei_runtime::{Script, ScriptedRuntime};

    static INSTALL: Once = Once::new();

    fn setup() {
        INSTALL.call_once(|| {
            let script = Script::new().word("A").word("B").reply(&[0, 1]);
            assert!(install_runtime(Arc::new(ScriptedRuntime::new(script))));
        });
    }

    fn open(path: &str, n_ctx: i32) -> EiHandle {
        let path = CString::new(path).unwrap();
        unsafe { ei_open(path.as_ptr(), n_ctx, 4) }
    }

    fn complete(handle: EiHandle, prompt: &str, max_tokens: i32) -> String {
        let prompt = CString::new(prompt).unwrap();
        unsafe {
            let out = ei_complete(handle, prompt.as_ptr(), max_tokens);
            assert!(!out.is_null());
            let text = CStr::from_ptr(out).to_str().unwrap().to_string();
            ei_free_string(out);
            text
        }
    }

    fn last_error() -> Option<String> {
        let ptr = ei_last_error();
        if ptr.is_null() {
            return None;
        }
        unsafe {
            let msg = CStr::from_ptr(ptr).to_str().unwrap().to_string();
            ei_free_string(ptr);
            Some(msg)
        }
    }

    #[test]
    fn test_open_complete_close() {
        setup();
        let handle = open("model.bin", 512);
        assert_ne!(handle, 0);
        assert!(ei_is_valid(handle));
        assert_eq!(complete(handle, "Hello", 50), "AB");
        ei_close(handle);
        assert!(!ei_is_valid(handle));
        ei_close(handle);
    }

    #[test]
    fn test_out_of_range_params_are_clamped() {
        setup();
        let handle = open("model.bin", 10);
        assert_ne!(handle, 0);
        let handle2 = open("model.bin", 1 << 20);
        assert_ne!(handle2, 0);
        ei_close(handle);
        ei_close(handle2);
    }

    #[test]
    fn test_open_failures_return_zero() {
        setup();
        assert_eq!(open("", 512), INVALID_HANDLE);
        assert!(last_error().unwrap().contains("invalid argument"));
        assert_eq!(unsafe { ei_open(std::ptr::null(), 512, 4) }, INVALID_HANDLE);
        assert_eq!(open("file:///definitely/not/here.gguf", 512), INVALID_HANDLE);
        assert!(last_error().is_some());
    }

    #[test]
    fn test_complete_on_invalid_handle_is_empty() {
        setup();
        assert_eq!(complete(0, "Hello", 50), "");
        assert_eq!(complete(u64::MAX, "Hello", 50), "");
        let handle = open("model.bin", 512);
        let out = unsafe { ei_complete(handle, std::ptr::null(), 50) };
        unsafe {
            assert_eq!(CStr::from_ptr(out).to_bytes(), b"");
            ei_free_string(out);
        }
        ei_close(handle);
        assert_eq!(complete(handle, "Hello", 50), "");
    }

    #[test]
    fn test_complete_ex_reports_success() {
        setup();
        let handle = open("model.bin", 512);
        let prompt = CString::new("Hello").unwrap();
        let mut out = EiCompletion::empty();
        let status = unsafe { ei_complete_ex(handle, prompt.as_ptr(), 50, &mut out) };
        assert_eq!(status, EiStatus::Ok);
        assert_eq!(out.termination, EiTermination::EndOfGeneration);
        assert_eq!(out.generated_tokens, 2);
        // BOS plus one token per byte.
        assert_eq!(out.prompt_tokens, 6);
        assert_eq!(unsafe { CStr::from_ptr(out.text) }.to_str().unwrap(), "AB");
        unsafe {
            ei_completion_free(&mut out);
            ei_completion_free(&mut out);
        }
        assert!(out.text.is_null());
        ei_close(handle);
    }

    #[test]
    fn test_complete_ex_reports_failure() {
        setup();
        let handle = open("model.bin", 256);
        let prompt = CString::new("x".repeat(300)).unwrap();
        let mut out = EiCompletion::empty();
        let status = unsafe { ei_complete_ex(handle, prompt.as_ptr(), 50, &mut out) };
        assert_eq!(status, EiStatus::ErrorPromptTooLong);
        assert!(out.text.is_null());
        assert_eq!(out.termination, EiTermination::None);
        assert!(last_error().unwrap().contains("prompt too long"));

        assert_eq!(
            unsafe { ei_complete_ex(handle, prompt.as_ptr(), 50, std::ptr::null_mut()) },
            EiStatus::ErrorInvalidArgument
        );
        let status = unsafe { ei_complete_ex(0, prompt.as_ptr(), 50, &mut out) };
        assert_eq!(status, EiStatus::ErrorInvalidHandle);
        ei_close(handle);
    }

    #[test]
    fn test_cached_session() {
        setup();
        let path = CString::new("cached.bin").unwrap();
        let a = unsafe { ei_cached_open(path.as_ptr(), 512, 4) };
        let b = unsafe { ei_cached_open(path.as_ptr(), 1024, 2) };
        assert_ne!(a, 0);
        assert_eq!(a, b);
        assert_eq!(complete(a, "Hi", 10), "AB");
        assert_eq!(cache_state().handle, a);

        let other = CString::new("other.bin").unwrap();
        let c = unsafe { ei_cached_open(other.as_ptr(), 512, 4) };
        assert_ne!(c, a);
        assert!(!ei_is_valid(a));

        assert!(ei_cached_release());
        assert!(!ei_cached_release());
        assert!(!ei_is_valid(c));
    }

    #[test]
    fn test_second_install_is_ignored() {
        setup();
        assert!(!install_runtime(Arc::new(ScriptedRuntime::new(Script::new()))));
        let handle = open("model.bin", 512);
        assert_eq!(complete(handle, "Hello", 50), "AB");
        ei_close(handle);
    }

    #[test]
    fn test_catch_panic() {
        let caught = catch_panic(|| -> i32 { panic!("kaboom") });
        assert_eq!(caught, None);
        assert!(last_error().unwrap().contains("kaboom"));
        assert_eq!(catch_panic(|| 7), Some(7));
    }

    #[test]
    fn test_into_c_string_stops_at_nul() {
        let ptr = into_c_string("ab\0cd");
        unsafe {
            assert_eq!(CStr::from_ptr(ptr).to_str().unwrap(), "ab");
            ei_free_string(ptr);
        }
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe {
            ei_free_string(std::ptr::null_mut());
            ei_completion_free(std::ptr::null_mut());
        }
    }
}
