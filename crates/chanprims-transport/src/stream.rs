use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// Socket type used for a connected pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Byte stream (`SOCK_STREAM`).
    Stream,
    /// Reliable, message-boundary preserving (`SOCK_SEQPACKET`).
    ///
    /// Not every platform supports this for `AF_UNIX`; pair creation fails there.
    SeqPacket,
}

impl SocketKind {
    /// Preferred kind for channel pairs on this platform.
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Self::SeqPacket
        } else {
            Self::Stream
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocketKind::Stream => "stream",
            SocketKind::SeqPacket => "seqpacket",
        }
    }
}

/// A connected Unix socket. Implements Read + Write.
///
/// `&IpcStream` is also Read + Write, so a shared reference is enough to move
/// bytes. Dropping the stream closes its descriptor.
pub struct IpcStream {
    inner: UnixStream,
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Read for &IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.inner).read(buf)
    }
}

impl Write for &IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&self.inner).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&self.inner).flush()
    }
}

impl IpcStream {
    /// Create a connected pair of the given kind.
    pub fn pair_of(kind: SocketKind) -> std::io::Result<(Self, Self)> {
        match kind {
            SocketKind::Stream => {
                let (a, b) = UnixStream::pair()?;
                Ok((Self::from_unix(a), Self::from_unix(b)))
            }
            SocketKind::SeqPacket => {
                let (a, b) = seqpacket_pair()?;
                Ok((Self::from(a), Self::from(b)))
            }
        }
    }

    /// Create a connected byte-stream pair.
    pub fn pair() -> std::io::Result<(Self, Self)> {
        Self::pair_of(SocketKind::Stream)
    }

    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self { inner: stream }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Duplicate the descriptor (close-on-exec). Both copies refer to the same socket.
    pub fn try_clone(&self) -> std::io::Result<Self> {
        self.inner.try_clone().map(Self::from_unix)
    }

    /// Set `SO_SNDBUF` and `SO_RCVBUF` to `size` bytes.
    pub fn set_buffer_size(&self, size: usize) -> std::io::Result<()> {
        let value = libc::c_int::try_from(size).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "socket buffer size exceeds c_int",
            )
        })?;
        set_int_option(self.as_raw_fd(), libc::SO_SNDBUF, value)?;
        set_int_option(self.as_raw_fd(), libc::SO_RCVBUF, value)
    }

    /// Whether the descriptor still refers to an open file.
    pub fn is_valid(&self) -> bool {
        descriptor_is_open(self.as_fd())
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl From<OwnedFd> for IpcStream {
    fn from(fd: OwnedFd) -> Self {
        Self::from_unix(UnixStream::from(fd))
    }
}

impl From<IpcStream> for OwnedFd {
    fn from(stream: IpcStream) -> Self {
        OwnedFd::from(stream.inner)
    }
}

impl AsFd for IpcStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.inner.as_raw_fd()
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("fd", &self.inner.as_raw_fd())
            .finish()
    }
}

/// `fcntl(F_GETFL)` succeeds only on an open descriptor.
pub(crate) fn descriptor_is_open(fd: BorrowedFd<'_>) -> bool {
    // SAFETY: F_GETFL takes no pointer arguments; `fd` is borrowed for the call.
    unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) != -1 }
}

fn set_int_option(fd: libc::c_int, option: libc::c_int, value: libc::c_int) -> std::io::Result<()> {
    // SAFETY: `value` lives for the duration of the call and its size is passed alongside.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn seqpacket_pair() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let socket_type = libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let socket_type = libc::SOCK_SEQPACKET;

    // SAFETY: `fds` is a writable array of two c_ints as socketpair requires.
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, socket_type, 0, fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: socketpair succeeded, so both descriptors are open and owned by nobody else.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        set_cloexec(pair.0.as_raw_fd())?;
        set_cloexec(pair.1.as_raw_fd())?;
    }

    Ok(pair)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(fd: libc::c_int) -> std::io::Result<()> {
    // SAFETY: F_SETFD with an integer flag argument; no pointers involved.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}
