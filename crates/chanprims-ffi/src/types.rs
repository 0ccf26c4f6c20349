use std::ffi::c_void;
use std::os::raw::c_char;

use chanprims_handle::ConnectionToken;
use chanprims_parcel::Parcel;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanResult {
    Ok = 0,
    InvalidArgument = 1,
    TransportError = 2,
    InvalidHandle = 3,
    DuplicationError = 4,
    ParcelError = 5,
    Internal = 99,
}

#[allow(dead_code)]
pub const CHAN_OK: ChanResult = ChanResult::Ok;
#[allow(dead_code)]
pub const CHAN_ERR_INVALID_ARGUMENT: ChanResult = ChanResult::InvalidArgument;
#[allow(dead_code)]
pub const CHAN_ERR_TRANSPORT: ChanResult = ChanResult::TransportError;
#[allow(dead_code)]
pub const CHAN_ERR_INVALID_HANDLE: ChanResult = ChanResult::InvalidHandle;
#[allow(dead_code)]
pub const CHAN_ERR_DUPLICATION: ChanResult = ChanResult::DuplicationError;
#[allow(dead_code)]
pub const CHAN_ERR_PARCEL: ChanResult = ChanResult::ParcelError;
#[allow(dead_code)]
pub const CHAN_ERR_INTERNAL: ChanResult = ChanResult::Internal;

/// The "no handle" reference.
pub const CHAN_ABSENT: u64 = 0;

/// Connection identity as seen from C. All-zero means absent.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChanToken {
    pub origin_pid: u32,
    pub serial: u64,
}

impl From<ConnectionToken> for ChanToken {
    fn from(token: ConnectionToken) -> Self {
        Self {
            origin_pid: token.origin_pid(),
            serial: token.serial(),
        }
    }
}

/// Disposes (if needed) and frees the referenced handle.
pub type ChanFinalizer = extern "C" fn(reference: u64);

/// The channel being disposed, as handed to a [`ChanDisposeCallback`].
///
/// `fd` is still open and owned by the library; borrow it, never close it.
/// `name` is NUL-terminated and valid only for the duration of the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ChanChannelInfo {
    pub fd: i32,
    pub token: ChanToken,
    pub name: *const c_char,
}

/// Called once, at first disposal, with the channel still open.
pub type ChanDisposeCallback =
    unsafe extern "C" fn(reference: u64, channel: *const ChanChannelInfo, data: *mut c_void);

pub type ChanParcelHandle = *mut c_void;

pub(crate) struct ParcelHandle {
    pub(crate) parcel: Parcel,
}
