use chanprims_parcel::ParcelError;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connected socket pair for a new channel could not be created.
    #[error("could not open channel pair {name:?}: {source}")]
    SocketPair {
        name: String,
        source: std::io::Error,
    },

    /// The OS-level duplicate of a channel descriptor failed.
    #[error("could not duplicate channel {name:?}: {source}")]
    Duplicate {
        name: String,
        source: std::io::Error,
    },

    /// A decoded descriptor does not refer to an open file.
    #[error("channel {name:?} decoded with an invalid descriptor")]
    InvalidDescriptor { name: String },

    /// Reading or writing the channel encoding failed.
    #[error("parcel error: {0}")]
    Parcel(#[from] ParcelError),

    /// An I/O error occurred on the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transfer header did not start with the expected magic.
    #[error("invalid transfer magic (expected 0x4350 \"CP\")")]
    InvalidMagic,

    /// The parcel data exceeds the configured maximum.
    #[error("transfer too large ({size} bytes, max {max})")]
    TransferTooLarge { size: usize, max: usize },

    /// The parcel carries more descriptors than allowed.
    #[error("too many descriptors ({count}, max {max})")]
    TooManyDescriptors { count: usize, max: usize },

    /// The kernel dropped ancillary data because the control buffer was too small.
    #[error("descriptor control data truncated")]
    ControlTruncated,

    /// A datagram-style socket cut the transfer short.
    #[error("transfer truncated (parcel transfer requires a stream socket)")]
    MessageTruncated,

    /// The header announced a different number of descriptors than arrived.
    #[error("descriptor count mismatch (header {expected}, received {received})")]
    DescriptorMismatch { expected: usize, received: usize },

    /// The peer closed the socket before a complete transfer was received.
    #[error("connection closed (incomplete transfer)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
