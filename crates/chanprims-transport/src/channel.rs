use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use chanprims_parcel::Parcel;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::{IpcStream, SocketKind};
use crate::token::ConnectionToken;

/// Default `SO_SNDBUF`/`SO_RCVBUF` for channel pairs: 32 KiB.
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024;

/// Configuration for opening channel pairs.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Socket type of the pair. Default: seqpacket on Linux, stream elsewhere.
    pub kind: SocketKind,
    /// Send and receive buffer size applied to both ends.
    pub socket_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: SocketKind::platform_default(),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }
}

/// One end of a named, connected duplex channel.
///
/// The name is chosen when the pair is opened and shared by both ends. It is
/// for diagnostics only and need not be unique; the [`ConnectionToken`] is the
/// identity to compare.
#[derive(Debug)]
pub struct DuplexChannel {
    name: String,
    token: ConnectionToken,
    stream: IpcStream,
}

impl DuplexChannel {
    /// Open a connected pair with default configuration.
    pub fn open_pair(name: impl Into<String>) -> Result<(Self, Self)> {
        Self::open_pair_with_config(name, &ChannelConfig::default())
    }

    /// Open a connected pair. Either both ends are returned or neither is.
    pub fn open_pair_with_config(
        name: impl Into<String>,
        config: &ChannelConfig,
    ) -> Result<(Self, Self)> {
        let name = name.into();
        let socket_pair_error = |source| TransportError::SocketPair {
            name: name.clone(),
            source,
        };

        let (server, client) = IpcStream::pair_of(config.kind).map_err(socket_pair_error)?;
        server
            .set_buffer_size(config.socket_buffer_size)
            .map_err(socket_pair_error)?;
        client
            .set_buffer_size(config.socket_buffer_size)
            .map_err(socket_pair_error)?;

        let token = ConnectionToken::mint();
        debug!(%name, %token, kind = config.kind.as_str(), "opened channel pair");

        Ok((
            Self::from_parts(name.clone(), token, server),
            Self::from_parts(name, token, client),
        ))
    }

    /// Assemble a channel from an already-connected stream.
    pub fn from_parts(name: impl Into<String>, token: ConnectionToken, stream: IpcStream) -> Self {
        Self {
            name: name.into(),
            token,
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> ConnectionToken {
        self.token
    }

    pub fn stream(&self) -> &IpcStream {
        &self.stream
    }

    /// Produce an independent channel on a duplicated descriptor.
    ///
    /// The copy has the same name and token; closing either leaves the other open.
    pub fn dup(&self) -> Result<Self> {
        let stream = self
            .stream
            .try_clone()
            .map_err(|source| TransportError::Duplicate {
                name: self.name.clone(),
                source,
            })?;
        debug!(name = %self.name, token = %self.token, "duplicated channel");
        Ok(Self::from_parts(self.name.clone(), self.token, stream))
    }

    /// Encode as name, descriptor, token.
    ///
    /// The parcel stores its own duplicate of the descriptor.
    pub fn write_to_parcel(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_string(&self.name)?;
        parcel.write_fd(self.stream.as_fd())?;
        self.token.write_to(parcel);
        Ok(())
    }

    /// Decode a channel written by [`DuplexChannel::write_to_parcel`].
    ///
    /// The returned channel owns a fresh duplicate of the parcel's descriptor.
    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let name = parcel.read_string()?;
        let fd = parcel.read_fd()?;
        let token = ConnectionToken::read_from(parcel)?;

        let stream = IpcStream::from(fd);
        if !stream.is_valid() {
            return Err(TransportError::InvalidDescriptor { name });
        }
        Ok(Self::from_parts(name, token, stream))
    }

    /// `(uid, gid, pid)` of the process holding the other end, where supported.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.stream.peer_credentials()
    }
}

impl Read for &DuplexChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.stream).read(buf)
    }
}

impl Write for &DuplexChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&self.stream).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&self.stream).flush()
    }
}

impl AsFd for DuplexChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
