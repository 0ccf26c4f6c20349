use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{ParcelError, Result};

/// Strings are zero-padded to this boundary so every value starts aligned.
pub const ALIGNMENT: usize = 4;

/// A data buffer plus the descriptors it references.
///
/// Layout of each primitive in the data buffer:
/// ```text
/// i32 / u32   4 bytes LE
/// u64         8 bytes LE
/// string      u32 LE byte length, UTF-8 bytes, zero padding to 4
/// descriptor  i32 LE index into the descriptor table
/// ```
///
/// Writes always append. Reads advance an independent read position, so a parcel
/// can be filled, rewound, and read back in the same process.
#[derive(Debug, Default)]
pub struct Parcel {
    data: BytesMut,
    read_pos: usize,
    fds: Vec<OwnedFd>,
}

impl Parcel {
    /// Create an empty parcel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a parcel from received data and descriptors.
    pub fn from_parts(data: impl Into<Bytes>, fds: Vec<OwnedFd>) -> Self {
        let data: Bytes = data.into();
        Self {
            data: BytesMut::from(data.as_ref()),
            read_pos: 0,
            fds,
        }
    }

    /// The written data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of data bytes written.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Current read position.
    pub fn data_position(&self) -> usize {
        self.read_pos
    }

    /// Move the read position.
    pub fn set_data_position(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(ParcelError::BadPosition {
                position,
                size: self.data.len(),
            });
        }
        self.read_pos = position;
        Ok(())
    }

    /// Reset the read position to the start of the data.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Number of attached descriptors.
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Borrow the attached descriptors in index order.
    pub fn fds(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd())
    }

    /// Drop everything written after `data_size` bytes and `fd_count` descriptors.
    ///
    /// Lets a writer roll back a partially written value. Larger sizes are a no-op,
    /// and the read position is clamped to the new end.
    pub fn truncate(&mut self, data_size: usize, fd_count: usize) {
        self.data.truncate(data_size);
        self.fds.truncate(fd_count);
        self.read_pos = self.read_pos.min(self.data.len());
    }

    /// Consume the parcel, returning its data and descriptors.
    pub fn into_parts(self) -> (Bytes, Vec<OwnedFd>) {
        (self.data.freeze(), self.fds)
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| ParcelError::TooLarge {
            size: value.len(),
        })?;
        self.data.reserve(4 + padded_len(value.len()));
        self.data.put_u32_le(len);
        self.data.put_slice(value.as_bytes());
        self.data.put_bytes(0, padded_len(value.len()) - value.len());
        Ok(())
    }

    /// Attach a duplicate of `fd` and write its table index.
    pub fn write_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        let index = i32::try_from(self.fds.len()).map_err(|_| ParcelError::TooLarge {
            size: self.fds.len(),
        })?;
        let owned = fd.try_clone_to_owned()?;
        trace!(index, "attached descriptor to parcel");
        self.fds.push(owned);
        self.write_i32(index);
        Ok(())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.take(8)?.get_u64_le())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let offset = self.read_pos;
        let padded = self.take(padded_len(len))?;
        std::str::from_utf8(&padded[..len])
            .map(str::to_owned)
            .map_err(|_| ParcelError::InvalidUtf8 { offset })
    }

    /// Read a descriptor reference and return a fresh duplicate of it.
    ///
    /// The parcel keeps its own copy; the caller owns the returned descriptor.
    pub fn read_fd(&mut self) -> Result<OwnedFd> {
        let index = self.read_i32()?;
        let fd = usize::try_from(index)
            .ok()
            .and_then(|i| self.fds.get(i))
            .ok_or(ParcelError::BadDescriptorIndex {
                index,
                count: self.fds.len(),
            })?;
        Ok(fd.try_clone()?)
    }

    fn take(&mut self, needed: usize) -> Result<&[u8]> {
        let available = self.data.len().saturating_sub(self.read_pos);
        if needed > available {
            return Err(ParcelError::Underrun {
                offset: self.read_pos,
                needed,
                available,
            });
        }
        let start = self.read_pos;
        self.read_pos += needed;
        Ok(&self.data[start..start + needed])
    }
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(ALIGNMENT) * ALIGNMENT
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn integers_and_strings_read_back_in_order() {
        let mut parcel = Parcel::new();
        parcel.write_i32(-7);
        parcel.write_string("input").unwrap();
        parcel.write_u64(u64::MAX - 1);
        parcel.write_u32(42);

        parcel.rewind();
        assert_eq!(parcel.read_i32().unwrap(), -7);
        assert_eq!(parcel.read_string().unwrap(), "input");
        assert_eq!(parcel.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(parcel.read_u32().unwrap(), 42);
        assert_eq!(parcel.data_position(), parcel.data_size());
    }

    #[test]
    fn strings_are_padded_to_alignment() {
        let mut parcel = Parcel::new();
        parcel.write_string("abcde").unwrap();
        assert_eq!(parcel.data_size(), 4 + 8);
        assert_eq!(&parcel.data()[4..12], b"abcde\0\0\0");

        let mut empty = Parcel::new();
        empty.write_string("").unwrap();
        assert_eq!(empty.data_size(), 4);
        assert_eq!(empty.read_string().unwrap(), "");
    }

    #[test]
    fn underrun_reports_offset() {
        let mut parcel = Parcel::new();
        parcel.write_u32(1);
        parcel.read_u32().unwrap();

        let err = parcel.read_i32().unwrap_err();
        assert!(matches!(
            err,
            ParcelError::Underrun {
                offset: 4,
                needed: 4,
                available: 0
            }
        ));
    }

    #[test]
    fn truncated_string_is_underrun() {
        let mut parcel = Parcel::new();
        parcel.write_u32(64);
        parcel.write_u32(0);
        assert!(matches!(
            parcel.read_string(),
            Err(ParcelError::Underrun { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(2);
        wire.put_slice(&[0xC3, 0x28, 0, 0]);
        let mut parcel = Parcel::from_parts(wire.freeze(), Vec::new());
        assert!(matches!(
            parcel.read_string(),
            Err(ParcelError::InvalidUtf8 { offset: 4 })
        ));
    }

    #[test]
    fn descriptor_read_is_an_independent_duplicate() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut parcel = Parcel::new();
        parcel.write_fd(left.as_fd()).unwrap();
        drop(left);
        assert_eq!(parcel.fd_count(), 1);

        parcel.rewind();
        let fd = parcel.read_fd().unwrap();
        let mut restored = UnixStream::from(fd);
        restored.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        // The parcel still holds its own copy after handing one out.
        parcel.rewind();
        assert!(parcel.read_fd().is_ok());
    }

    #[test]
    fn descriptor_index_out_of_range() {
        let mut parcel = Parcel::new();
        parcel.write_i32(3);
        assert!(matches!(
            parcel.read_fd(),
            Err(ParcelError::BadDescriptorIndex { index: 3, count: 0 })
        ));

        let mut negative = Parcel::new();
        negative.write_i32(-1);
        assert!(matches!(
            negative.read_fd(),
            Err(ParcelError::BadDescriptorIndex { index: -1, .. })
        ));
    }

    #[test]
    fn truncate_rolls_back_data_and_descriptors() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut parcel = Parcel::new();
        parcel.write_i32(1);
        let (size, fds) = (parcel.data_size(), parcel.fd_count());

        parcel.write_string("partial").unwrap();
        parcel.write_fd(left.as_fd()).unwrap();
        parcel.truncate(size, fds);

        assert_eq!(parcel.data(), &1i32.to_le_bytes());
        assert_eq!(parcel.fd_count(), 0);
        parcel.set_data_position(4).unwrap();
        parcel.truncate(0, 0);
        assert_eq!(parcel.data_position(), 0);
    }

    #[test]
    fn set_data_position_bounds() {
        let mut parcel = Parcel::new();
        parcel.write_u64(9);
        assert!(parcel.set_data_position(8).is_ok());
        assert!(matches!(
            parcel.set_data_position(9),
            Err(ParcelError::BadPosition {
                position: 9,
                size: 8
            })
        ));
    }
}
