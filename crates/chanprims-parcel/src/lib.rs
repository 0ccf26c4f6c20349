//! Serialization container for moving structured data across a process boundary.
//!
//! A [`Parcel`] carries two things:
//! - a little-endian data buffer of integers and length-prefixed strings
//! - an out-of-band table of file descriptors referenced from the data by index
//!
//! Descriptors are owned by the parcel. Writing one stores a duplicate, reading one
//! hands out a fresh duplicate, so the parcel never lends out its own copies.
//!
//! Unix only.

pub mod error;
pub mod parcel;

pub use error::{ParcelError, Result};
pub use parcel::{Parcel, ALIGNMENT};
