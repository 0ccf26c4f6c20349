//! Handle wire encoding.
//!
//! ```text
//! i32 presence flag     0 = absent, 1 = present
//! channel encoding      only when present: name, descriptor, token
//! ```
//!
//! The flag is always read before anything else, and a zero flag ends the
//! field with no error.

use chanprims_parcel::Parcel;
use chanprims_transport::DuplexChannel;
use tracing::trace;

use crate::error::{HandleError, Result};
use crate::handle::Handle;

pub const FLAG_ABSENT: i32 = 0;
pub const FLAG_PRESENT: i32 = 1;

/// Write `handle` (or its absence) into `parcel`.
///
/// A present handle that is no longer active is rejected before anything is written.
/// If encoding fails partway, the parcel is rolled back to where it started.
pub fn write_handle(parcel: &mut Parcel, handle: Option<&Handle>) -> Result<()> {
    let Some(handle) = handle else {
        parcel.write_i32(FLAG_ABSENT);
        return Ok(());
    };

    let (data_size, fd_count) = (parcel.data_size(), parcel.fd_count());
    handle.with_channel("serialize", |channel| {
        parcel.write_i32(FLAG_PRESENT);
        channel.write_to_parcel(parcel).map_err(|err| {
            parcel.truncate(data_size, fd_count);
            HandleError::Encode(err)
        })
    })?
}

/// Read a handle written by [`write_handle`].
///
/// Any non-zero flag counts as present. The returned handle owns a fresh
/// duplicate of the parcel's descriptor and is only built once decoding has
/// fully succeeded.
pub fn read_handle(parcel: &mut Parcel) -> Result<Option<Handle>> {
    if parcel.read_i32()? == FLAG_ABSENT {
        trace!("decoded absent channel handle");
        return Ok(None);
    }
    let channel = DuplexChannel::read_from_parcel(parcel).map_err(HandleError::Decode)?;
    Ok(Some(Handle::new(channel)))
}
