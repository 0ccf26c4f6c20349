use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use chanprims_handle::HandleError;

use crate::types::ChanResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> ChanResult {
    set_error_message(message);
    ChanResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_handle_error(err: &HandleError) -> ChanResult {
    set_error_message(err.to_string());
    match err {
        HandleError::TransportCreation(_) => ChanResult::TransportError,
        HandleError::InvalidHandle { .. } => ChanResult::InvalidHandle,
        HandleError::Duplication(_) => ChanResult::DuplicationError,
        HandleError::Encode(_) | HandleError::Decode(_) | HandleError::Parcel(_) => {
            ChanResult::ParcelError
        }
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
