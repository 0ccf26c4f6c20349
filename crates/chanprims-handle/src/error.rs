use std::fmt;

use chanprims_parcel::ParcelError;
use chanprims_transport::TransportError;

use crate::handle::HandleState;

/// Why an operation found no usable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The reference was the absent sentinel.
    Absent,
    /// The reference does not name a handle in the table.
    Unknown(u64),
    /// The handle exists but is no longer active.
    State(HandleState),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Absent => f.write_str("absent"),
            InvalidReason::Unknown(id) => write!(f, "unknown reference {id}"),
            InvalidReason::State(state) => write!(f, "{state}"),
        }
    }
}

/// Errors that can occur in channel handle operations.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The channel pair could not be created at the OS level.
    #[error(transparent)]
    TransportCreation(TransportError),

    /// The operation needs an active handle.
    #[error("{operation}: channel handle is {reason}")]
    InvalidHandle {
        operation: &'static str,
        reason: InvalidReason,
    },

    /// The OS-level duplicate failed; the original handle is untouched.
    #[error(transparent)]
    Duplication(TransportError),

    /// Writing the channel encoding into a parcel failed.
    #[error("channel encode failed: {0}")]
    Encode(TransportError),

    /// The channel decoder rejected the parcel contents.
    #[error("channel decode failed: {0}")]
    Decode(TransportError),

    /// The parcel itself could not be read.
    #[error("parcel error: {0}")]
    Parcel(#[from] ParcelError),
}

impl HandleError {
    pub(crate) fn invalid(operation: &'static str, reason: InvalidReason) -> Self {
        HandleError::InvalidHandle { operation, reason }
    }

    /// The OS error code behind a transport failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        let transport = match self {
            HandleError::TransportCreation(err)
            | HandleError::Duplication(err)
            | HandleError::Encode(err)
            | HandleError::Decode(err) => err,
            HandleError::Parcel(ParcelError::Descriptor(io)) => return io.raw_os_error(),
            _ => return None,
        };
        match transport {
            TransportError::SocketPair { source, .. } | TransportError::Duplicate { source, .. } => {
                source.raw_os_error()
            }
            TransportError::Io(io) | TransportError::Parcel(ParcelError::Descriptor(io)) => {
                io.raw_os_error()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HandleError>;
