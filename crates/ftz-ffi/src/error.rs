use std::cell::RefCell;
use std::ffi::CString;

use ftz_tensor::TensorError;

use crate::types::FtzStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `ftz_last_error`.
pub fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` as the last error and return its status code.
pub fn fail(err: TensorError) -> FtzStatus {
    let status = FtzStatus::from(&err);
    set_last_error(err.to_string());
    status
}
