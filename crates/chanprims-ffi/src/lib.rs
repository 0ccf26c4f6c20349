//! chanprims-ffi: C-ABI exports for channel handles.
//!
//! Handles cross this boundary as `uint64_t` references into a process-wide
//! handle table; `0` always means "no handle". Parcels cross as opaque pointers.

mod args;
mod channel;
mod error;
mod parcel;
mod types;

use std::panic::AssertUnwindSafe;

pub use channel::{
    chan_dispose, chan_dup, chan_finalize, chan_get_finalizer, chan_get_name, chan_get_token,
    chan_open_pair, chan_read_from_parcel, chan_register_dispose_callback, chan_string_free,
    chan_write_to_parcel,
};
pub use parcel::{chan_parcel_data_size, chan_parcel_free, chan_parcel_new, chan_parcel_rewind};
pub use types::{
    ChanChannelInfo, ChanDisposeCallback, ChanFinalizer, ChanParcelHandle, ChanResult, ChanToken, CHAN_ABSENT,
    CHAN_ERR_DUPLICATION, CHAN_ERR_INTERNAL, CHAN_ERR_INVALID_ARGUMENT, CHAN_ERR_INVALID_HANDLE,
    CHAN_ERR_PARCEL, CHAN_ERR_TRANSPORT, CHAN_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

#[no_mangle]
pub extern "C" fn chan_init() -> ChanResult {
    ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();
        ChanResult::Ok
    })
}

#[no_mangle]
pub extern "C" fn chan_cleanup() {
    ffi_boundary((), || {
        error::clear_error_state();
    });
}

#[no_mangle]
pub extern "C" fn chan_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
