use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chanprims_parcel::Parcel;

use crate::error::Result;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one channel connection.
///
/// Both ends of a pair carry the same token, and it survives duplication and
/// parcel round trips unchanged, so consumers can key authorization decisions
/// on "which connection is this" without touching the descriptor.
///
/// Serials start at 1; the all-zero token ([`ConnectionToken::ABSENT`]) never
/// names a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionToken {
    origin_pid: u32,
    serial: u64,
}

impl ConnectionToken {
    pub const ABSENT: Self = Self {
        origin_pid: 0,
        serial: 0,
    };

    /// Mint a token unique within this process.
    pub fn mint() -> Self {
        Self {
            origin_pid: std::process::id(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn from_raw(origin_pid: u32, serial: u64) -> Self {
        Self { origin_pid, serial }
    }

    /// Process that minted the token.
    pub fn origin_pid(&self) -> u32 {
        self.origin_pid
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }

    pub(crate) fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_u32(self.origin_pid);
        parcel.write_u64(self.serial);
    }

    pub(crate) fn read_from(parcel: &mut Parcel) -> Result<Self> {
        let origin_pid = parcel.read_u32()?;
        let serial = parcel.read_u64()?;
        Ok(Self { origin_pid, serial })
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:016x}", self.origin_pid, self.serial)
    }
}
