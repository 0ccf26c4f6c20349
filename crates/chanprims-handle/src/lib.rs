//! Lifecycle, identity and wire encoding for duplex channel handles.
//!
//! A [`Handle`] owns one [`DuplexChannel`] end and at most one disposal hook.
//! Disposal is idempotent: whichever caller wins the `Active -> Disposing`
//! transition runs the hook and releases the channel, everyone else is a no-op.
//!
//! [`HandleTable`] maps opaque [`HandleId`]s to handles for callers that can
//! only hold an integer, with `HandleId::ABSENT` (0) meaning "no handle".

pub mod codec;
pub mod error;
pub mod handle;
pub mod pair;
pub mod table;

pub use chanprims_transport::{ChannelConfig, ConnectionToken, DuplexChannel};
pub use codec::{read_handle, write_handle, FLAG_ABSENT, FLAG_PRESENT};
pub use error::{HandleError, InvalidReason, Result};
pub use handle::{DisposalHook, Handle, HandleState};
pub use pair::{open_pair, open_pair_with_config};
pub use table::{HandleId, HandleTable};
