use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use chanprims_parcel::Parcel;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Transfer header: magic (2) + data length (4) + descriptor count (2) = 8 bytes.
pub const TRANSFER_HEADER_SIZE: usize = 8;

/// Magic bytes: "CP" (0x43 0x50).
pub const TRANSFER_MAGIC: [u8; 2] = [0x43, 0x50];

/// Default maximum parcel data size: 1 MiB.
pub const DEFAULT_MAX_DATA_SIZE: usize = 1024 * 1024;

/// Default maximum descriptors per transfer.
pub const DEFAULT_MAX_FDS: usize = 64;

/// Configuration for parcel transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum parcel data size in bytes. Default: 1 MiB.
    pub max_data_size: usize,
    /// Maximum descriptors attached to one parcel. Default: 64.
    pub max_fds: usize,
    /// Read timeout for blocking receives.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking sends.
    pub write_timeout: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            max_fds: DEFAULT_MAX_FDS,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Sends and receives whole parcels, descriptors included, over a stream socket.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬───────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ FD count  │ Parcel data      │
/// │ 0x43 0x50    │ (4B LE)   │ (2B LE)   │ (Length bytes)   │
/// │ "CP"         │           │           │                  │
/// └──────────────┴───────────┴───────────┴─────────────────┘
/// ```
/// The descriptors travel as `SCM_RIGHTS` ancillary data on the first byte of
/// the header; the receiving kernel installs fresh descriptors for them.
pub struct ParcelTransport {
    stream: IpcStream,
    config: TransferConfig,
}

impl ParcelTransport {
    /// Wrap a stream with default configuration.
    pub fn new(stream: IpcStream) -> Self {
        Self {
            stream,
            config: TransferConfig::default(),
        }
    }

    /// Wrap a stream and apply the configured timeouts to it.
    pub fn with_config(stream: IpcStream, config: TransferConfig) -> Result<Self> {
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        Ok(Self { stream, config })
    }

    /// Send a parcel and its descriptors.
    pub fn send(&mut self, parcel: &Parcel) -> Result<()> {
        let data = parcel.data();
        if data.len() > self.config.max_data_size {
            return Err(TransportError::TransferTooLarge {
                size: data.len(),
                max: self.config.max_data_size,
            });
        }
        let fds: Vec<RawFd> = parcel.fds().map(|fd| fd.as_raw_fd()).collect();
        if fds.len() > self.config.max_fds || fds.len() > u16::MAX as usize {
            return Err(TransportError::TooManyDescriptors {
                count: fds.len(),
                max: self.config.max_fds.min(u16::MAX as usize),
            });
        }

        let mut header = BytesMut::with_capacity(TRANSFER_HEADER_SIZE);
        header.put_slice(&TRANSFER_MAGIC);
        header.put_u32_le(data.len() as u32);
        header.put_u16_le(fds.len() as u16);

        let sent = send_with_fds(self.stream.as_raw_fd(), &header, data, &fds)?;
        if sent < header.len() {
            (&self.stream).write_all(&header[sent..])?;
            (&self.stream).write_all(data)?;
        } else {
            (&self.stream).write_all(&data[sent - header.len()..])?;
        }

        debug!(size = data.len(), fds = fds.len(), "sent parcel");
        Ok(())
    }

    /// Receive the next parcel (blocking).
    ///
    /// Returns `Err(TransportError::ConnectionClosed)` when EOF is reached.
    pub fn recv(&mut self) -> Result<Parcel> {
        let mut header = [0u8; TRANSFER_HEADER_SIZE];
        let received = recv_with_fds(self.stream.as_raw_fd(), &mut header, self.config.max_fds)?;
        if received.len == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        if received.control_truncated {
            return Err(TransportError::ControlTruncated);
        }
        if received.message_truncated {
            return Err(TransportError::MessageTruncated);
        }
        if received.len < TRANSFER_HEADER_SIZE {
            read_exact_or_closed(&self.stream, &mut header[received.len..])?;
        }

        let mut cursor = &header[..];
        if cursor[..2] != TRANSFER_MAGIC {
            return Err(TransportError::InvalidMagic);
        }
        cursor.advance(2);
        let size = cursor.get_u32_le() as usize;
        let expected_fds = cursor.get_u16_le() as usize;

        if size > self.config.max_data_size {
            return Err(TransportError::TransferTooLarge {
                size,
                max: self.config.max_data_size,
            });
        }
        if expected_fds != received.fds.len() {
            return Err(TransportError::DescriptorMismatch {
                expected: expected_fds,
                received: received.fds.len(),
            });
        }

        let mut data = vec![0u8; size];
        read_exact_or_closed(&self.stream, &mut data)?;

        debug!(size, fds = expected_fds, "received parcel");
        Ok(Parcel::from_parts(data, received.fds))
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &IpcStream {
        &self.stream
    }

    /// Consume the transport and return the inner stream.
    pub fn into_inner(self) -> IpcStream {
        self.stream
    }

    /// Current transfer configuration.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }
}

fn read_exact_or_closed(stream: &IpcStream, buf: &mut [u8]) -> Result<()> {
    let mut reader = stream;
    reader.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
        _ => TransportError::Io(err),
    })
}

struct Received {
    len: usize,
    fds: Vec<OwnedFd>,
    control_truncated: bool,
    message_truncated: bool,
}

/// Control buffer sized for `max_fds` descriptors, aligned for `cmsghdr`.
fn control_buffer(max_fds: usize) -> Vec<u64> {
    let payload = (max_fds * std::mem::size_of::<libc::c_int>()) as libc::c_uint;
    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE(payload) } as usize;
    vec![0u64; space.div_ceil(std::mem::size_of::<u64>())]
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

fn send_with_fds(socket: RawFd, header: &[u8], data: &[u8], fds: &[RawFd]) -> Result<usize> {
    let mut iov = [
        libc::iovec {
            iov_base: header.as_ptr() as *mut libc::c_void,
            iov_len: header.len(),
        },
        libc::iovec {
            iov_base: data.as_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        },
    ];
    let iov_count = if data.is_empty() { 1 } else { 2 };

    let mut control = control_buffer(fds.len());
    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = iov.as_mut_ptr();
    msg.msg_iovlen = iov_count as _;

    if !fds.is_empty() {
        let payload = std::mem::size_of_val(fds) as libc::c_uint;
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        // SAFETY: pure size computation.
        msg.msg_controllen = unsafe { libc::CMSG_SPACE(payload) } as _;

        // SAFETY: msg_control points at a zeroed, aligned buffer of at least
        // CMSG_SPACE(payload) bytes, so the first header and its data area are in bounds.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload) as _;
            std::ptr::copy_nonoverlapping(
                fds.as_ptr(),
                libc::CMSG_DATA(cmsg).cast::<libc::c_int>(),
                fds.len(),
            );
        }
    }

    loop {
        // SAFETY: `msg` references iovecs and a control buffer that outlive the call.
        let sent = unsafe { libc::sendmsg(socket, &msg, SEND_FLAGS) };
        if sent >= 0 {
            trace!(sent, fds = fds.len(), "sendmsg");
            return Ok(sent as usize);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err.into());
        }
    }
}

fn recv_with_fds(socket: RawFd, buf: &mut [u8], max_fds: usize) -> Result<Received> {
    let mut iov = [libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    }];
    let mut control = control_buffer(max_fds);
    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = iov.as_mut_ptr();
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = (control.len() * std::mem::size_of::<u64>()) as _;

    let len = loop {
        // SAFETY: `msg` references a writable iovec and control buffer that outlive the call.
        let received = unsafe { libc::recvmsg(socket, &mut msg, RECV_FLAGS) };
        if received >= 0 {
            break received as usize;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err.into());
        }
    };

    let mut fds = Vec::new();
    // SAFETY: after a successful recvmsg the kernel has filled `msg_controllen` bytes of
    // well-formed control messages; the CMSG_* macros only walk within that range.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                let bytes = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = bytes / std::mem::size_of::<libc::c_int>();
                for i in 0..count {
                    let raw = std::ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in &fds {
        crate::stream::set_cloexec(fd.as_raw_fd())?;
    }

    Ok(Received {
        len,
        fds,
        control_truncated: msg.msg_flags & libc::MSG_CTRUNC != 0,
        message_truncated: msg.msg_flags & libc::MSG_TRUNC != 0,
    })
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsFd;
    use std::thread;

    use super::*;
    use crate::channel::DuplexChannel;

    #[test]
    fn parcel_without_descriptors_crosses_socket() {
        let (a, b) = IpcStream::pair().unwrap();
        let mut sender = ParcelTransport::new(a);
        let mut receiver = ParcelTransport::new(b);

        let mut parcel = Parcel::new();
        parcel.write_i32(0);
        parcel.write_string("plain").unwrap();
        sender.send(&parcel).unwrap();

        let mut received = receiver.recv().unwrap();
        assert_eq!(received.fd_count(), 0);
        assert_eq!(received.read_i32().unwrap(), 0);
        assert_eq!(received.read_string().unwrap(), "plain");
    }

    #[test]
    fn channel_descriptor_crosses_socket_and_stays_connected() {
        let (a, b) = IpcStream::pair().unwrap();
        let (server, client) = DuplexChannel::open_pair("transferred").unwrap();

        let mut parcel = Parcel::new();
        server.write_to_parcel(&mut parcel).unwrap();
        drop(server);

        let receiver = thread::spawn(move || {
            let mut transport = ParcelTransport::new(b);
            let mut parcel = transport.recv().unwrap();
            let channel = DuplexChannel::read_from_parcel(&mut parcel).unwrap();
            let mut writer = &channel;
            writer.write_all(b"from far side").unwrap();
            (channel.name().to_string(), channel.token())
        });

        let mut sender = ParcelTransport::new(a);
        sender.send(&parcel).unwrap();
        drop(parcel);

        let (name, token) = receiver.join().unwrap();
        assert_eq!(name, "transferred");
        assert_eq!(token, client.token());

        let mut buf = [0u8; 13];
        let mut reader = &client;
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"from far side");
    }

    #[test]
    fn multiple_parcels_in_sequence() {
        let (a, b) = IpcStream::pair().unwrap();
        let (extra, _peer) = IpcStream::pair().unwrap();
        let mut sender = ParcelTransport::new(a);
        let mut receiver = ParcelTransport::new(b);

        for i in 0..3 {
            let mut parcel = Parcel::new();
            parcel.write_i32(i);
            parcel.write_fd(extra.as_fd()).unwrap();
            sender.send(&parcel).unwrap();
        }
        for i in 0..3 {
            let mut parcel = receiver.recv().unwrap();
            assert_eq!(parcel.read_i32().unwrap(), i);
            assert_eq!(parcel.fd_count(), 1);
        }
    }

    #[test]
    fn eof_is_connection_closed() {
        let (a, b) = IpcStream::pair().unwrap();
        drop(a);
        let mut receiver = ParcelTransport::new(b);
        assert!(matches!(
            receiver.recv(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn invalid_magic_is_rejected() {
        let (a, b) = IpcStream::pair().unwrap();
        (&a).write_all(&[0xFF, 0xFF, 0, 0, 0, 0, 0, 0]).unwrap();
        let mut receiver = ParcelTransport::new(b);
        assert!(matches!(receiver.recv(), Err(TransportError::InvalidMagic)));
    }

    #[test]
    fn oversize_parcel_rejected_before_send() {
        let (a, _b) = IpcStream::pair().unwrap();
        let config = TransferConfig {
            max_data_size: 4,
            ..TransferConfig::default()
        };
        let mut sender = ParcelTransport::with_config(a, config).unwrap();
        let mut parcel = Parcel::new();
        parcel.write_u64(1);
        assert!(matches!(
            sender.send(&parcel),
            Err(TransportError::TransferTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn header_announcing_oversize_is_rejected() {
        let (a, b) = IpcStream::pair().unwrap();
        let mut header = BytesMut::new();
        header.put_slice(&TRANSFER_MAGIC);
        header.put_u32_le(64 * 1024 * 1024);
        header.put_u16_le(0);
        (&a).write_all(&header).unwrap();

        let mut receiver = ParcelTransport::new(b);
        assert!(matches!(
            receiver.recv(),
            Err(TransportError::TransferTooLarge { .. })
        ));
    }

    #[test]
    fn missing_descriptors_are_a_mismatch() {
        let (a, b) = IpcStream::pair().unwrap();
        let mut header = BytesMut::new();
        header.put_slice(&TRANSFER_MAGIC);
        header.put_u32_le(0);
        header.put_u16_le(2);
        (&a).write_all(&header).unwrap();

        let mut receiver = ParcelTransport::new(b);
        assert!(matches!(
            receiver.recv(),
            Err(TransportError::DescriptorMismatch {
                expected: 2,
                received: 0
            })
        ));
    }

    #[test]
    fn too_many_descriptors_rejected_before_send() {
        let (a, _b) = IpcStream::pair().unwrap();
        let (extra, _peer) = IpcStream::pair().unwrap();
        let config = TransferConfig {
            max_fds: 1,
            ..TransferConfig::default()
        };
        let mut sender = ParcelTransport::with_config(a, config).unwrap();
        let mut parcel = Parcel::new();
        parcel.write_fd(extra.as_fd()).unwrap();
        parcel.write_fd(extra.as_fd()).unwrap();
        assert!(matches!(
            sender.send(&parcel),
            Err(TransportError::TooManyDescriptors { count: 2, max: 1 })
        ));
    }

    #[test]
    fn read_timeout_applies() {
        let (_a, b) = IpcStream::pair().unwrap();
        let config = TransferConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..TransferConfig::default()
        };
        let mut receiver = ParcelTransport::with_config(b, config).unwrap();
        assert!(matches!(receiver.recv(), Err(TransportError::Io(_))));
    }
}
