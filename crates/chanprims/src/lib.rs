//! Named duplex channel handles for Unix processes.
//!
//! chanprims opens connected channel pairs, wraps each end in a [`Handle`] whose
//! disposal is idempotent and runs a one-shot hook, and moves handles between
//! processes inside a [`parcel::Parcel`] with descriptor passing.
//!
//! # Crate Structure
//!
//! - [`parcel`]: Byte buffer plus descriptor table used as the wire container
//! - [`transport`]: Socket pairs, the channel primitive and parcel transfer
//! - [`handle`]: Handle lifecycle, wire encoding and the opaque-reference table

/// Re-export parcel types.
pub mod parcel {
    pub use chanprims_parcel::*;
}

/// Re-export transport types.
pub mod transport {
    pub use chanprims_transport::*;
}

/// Re-export handle types.
pub mod handle {
    pub use chanprims_handle::*;
}

pub use chanprims_handle::{open_pair, Handle, HandleError, HandleId, HandleTable};
