use chanprims_parcel::Parcel;

use crate::error;
use crate::types::{ChanParcelHandle, ChanResult, ParcelHandle};

/// Borrow the parcel behind a handle, reporting null as an invalid argument.
pub(crate) fn with_parcel_mut<T>(
    handle: ChanParcelHandle,
    on_error: T,
    f: impl FnOnce(&mut Parcel) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("parcel handle cannot be null");
        return on_error;
    }

    let parcel_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &mut *(handle as *mut ParcelHandle) }
    };

    f(&mut parcel_handle.parcel)
}

/// Allocate an empty parcel.
#[no_mangle]
pub extern "C" fn chan_parcel_new() -> ChanParcelHandle {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        let handle = ParcelHandle {
            parcel: Parcel::new(),
        };
        Box::into_raw(Box::new(handle)) as ChanParcelHandle
    })
}

/// Reset the parcel's read position to the start.
///
/// # Safety
/// `parcel` must be a valid handle returned by `chan_parcel_new`.
#[no_mangle]
pub unsafe extern "C" fn chan_parcel_rewind(parcel: ChanParcelHandle) -> ChanResult {
    crate::ffi_boundary(ChanResult::Internal, || {
        error::clear_error_state();
        with_parcel_mut(parcel, ChanResult::InvalidArgument, |parcel| {
            parcel.rewind();
            ChanResult::Ok
        })
    })
}

/// Number of data bytes written to the parcel (0 for a null handle).
///
/// # Safety
/// `parcel` must be null or a valid handle returned by `chan_parcel_new`.
#[no_mangle]
pub unsafe extern "C" fn chan_parcel_data_size(parcel: ChanParcelHandle) -> usize {
    crate::ffi_boundary(0, || with_parcel_mut(parcel, 0, |parcel| parcel.data_size()))
}

/// Free a parcel and close the descriptors it holds.
///
/// # Safety
/// `parcel` must be null or a handle previously returned by `chan_parcel_new`.
#[no_mangle]
pub unsafe extern "C" fn chan_parcel_free(parcel: ChanParcelHandle) {
    crate::ffi_boundary((), || {
        if parcel.is_null() {
            return;
        }

        // SAFETY: Caller guarantees this handle was allocated by chan_parcel_new.
        unsafe {
            drop(Box::from_raw(parcel as *mut ParcelHandle));
        }
    });
}
