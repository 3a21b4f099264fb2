use std::cell::RefCell;
use std::ffi::CString;

use ei_session::SessionError;
use tracing::error;

use crate::types::EiStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `ei_last_error`.
pub fn set_last_error(msg: String) {
    let msg = msg.replace('\0', " ");
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Log a failed request, record it as the last error and map it to a status.
pub(crate) fn report(err: &SessionError) -> EiStatus {
    error!(error = %err, "request failed");
    set_last_error(err.to_string());
    EiStatus::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears() {
        set_last_error("boom".to_string());
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "boom");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_interior_nul_kept_readable() {
        set_last_error("bad\0path".to_string());
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "bad path");
    }

    #[test]
    fn test_report_maps_status() {
        let status = report(&SessionError::InvalidSession);
        assert_eq!(status, EiStatus::ErrorInvalidHandle);
        assert!(take_last_error().is_some());
    }
}
