//! Named duplex channel primitive over connected Unix sockets.
//!
//! This is the lowest layer that touches the OS:
//! - [`IpcStream`] wraps one connected socket descriptor
//! - [`DuplexChannel`] is a named stream end carrying a [`ConnectionToken`]
//! - [`ParcelTransport`] moves a [`Parcel`](chanprims_parcel::Parcel) and its
//!   descriptors across a socket with `SCM_RIGHTS`
//!
//! Everything above builds on [`DuplexChannel`].

pub mod channel;
pub mod error;
pub mod stream;
pub mod token;
pub mod transfer;

pub use channel::{ChannelConfig, DuplexChannel, DEFAULT_SOCKET_BUFFER_SIZE};
pub use error::{Result, TransportError};
pub use stream::{IpcStream, SocketKind};
pub use token::ConnectionToken;
pub use transfer::{ParcelTransport, TransferConfig, TRANSFER_HEADER_SIZE, TRANSFER_MAGIC};
