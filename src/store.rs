//! BlockStore capability
//!
//! The read/write/size contract shared by every storage backend.
//!
//! ## Addressing
//! ```text
//!   offset O ──► sector O / 512, byte O % 512
//!
//!   ┌────────────┬────────────┬────────────┬─────
//!   │ sector 0   │ sector 1   │ sector 2   │ ...
//!   │ [0, 512)   │ [512,1024) │ [1024,1536)│
//!   └────────────┴────────────┴────────────┴─────
//! ```
//!
//! The set of backends is closed: [`DirectStore`](crate::DirectStore) is the
//! leaf of every stack and [`OverlayStore`](crate::OverlayStore) shadows the
//! sectors of a child. New backends are added here, not downstream.

use crate::error::{DiskError, Result};

/// Size of a sector in bytes; the unit of COW tracking and persistence.
pub const SECTOR_SIZE: usize = 512;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Byte-addressable storage with a fixed size
pub trait BlockStore: sealed::Sealed {
    /// Diagnostic label supplied when the store was built
    fn name(&self) -> &str;

    /// Whether construction or the last `open` succeeded
    fn is_initialized(&self) -> bool;

    /// Addressable size in bytes
    fn size(&self) -> Result<u64>;

    /// Read `data.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes transferred. A request that runs past the
    /// end of the store is truncated and reported as a short count; a request
    /// that starts at or past the end fails with `OutOfRange`.
    fn read(&self, data: &mut [u8], offset: u64) -> Result<usize>;

    /// Write all of `data` at `offset`.
    ///
    /// Fails with `OutOfRange` if any byte would land outside the store.
    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize>;
}

/// Split an absolute offset into (sector index, offset within sector)
pub fn sector_of(offset: u64) -> (u64, usize) {
    (
        offset / SECTOR_SIZE as u64,
        (offset % SECTOR_SIZE as u64) as usize,
    )
}

/// Ensure a transfer starts inside the store
pub(crate) fn check_offset(offset: u64, len: usize, size: u64) -> Result<()> {
    if offset >= size {
        return Err(DiskError::OutOfRange { offset, len, size });
    }
    Ok(())
}

/// Ensure a transfer starts and ends inside the store
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    check_offset(offset, len, size)?;
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(DiskError::OutOfRange { offset, len, size }),
    }
}

/// Number of bytes a read of `len` at `offset` can transfer
pub(crate) fn clamp_len(offset: u64, len: usize, size: u64) -> usize {
    let available = size.saturating_sub(offset);
    (len as u64).min(available) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_of_splits_offsets() {
        assert_eq!(sector_of(0), (0, 0));
        assert_eq!(sector_of(511), (0, 511));
        assert_eq!(sector_of(512), (1, 0));
        assert_eq!(sector_of(1029), (2, 5));
    }

    #[test]
    fn check_offset_rejects_end_of_store() {
        assert!(check_offset(1023, 1, 1024).is_ok());
        assert!(matches!(
            check_offset(1024, 1, 1024).unwrap_err(),
            DiskError::OutOfRange { offset: 1024, .. }
        ));
    }

    #[test]
    fn check_range_rejects_overrun_and_overflow() {
        assert!(check_range(512, 512, 1024).is_ok());
        assert!(check_range(600, 512, 1024).is_err());
        assert!(check_range(u64::MAX - 1, 4, u64::MAX).is_err());
    }

    #[test]
    fn clamp_len_truncates_at_end() {
        assert_eq!(clamp_len(1000, 100, 1024), 24);
        assert_eq!(clamp_len(0, 100, 1024), 100);
    }
}
