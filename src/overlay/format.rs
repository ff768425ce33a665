//! Overlay file codec
//!
//! Encodes and decodes an overlay's sector table.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                        │
//! │   VersionMajor: i32 (4) | VersionMinor: i32 (4)         │
//! ├─────────────────────────────────────────────────────────┤
//! │ SectorCount: u64 (8)                                    │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (520 bytes each)                                │
//! │   [SectorIndex: u64][Payload: 512 bytes]                │
//! │   ... repeated SectorCount times ...                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. A file either decodes completely or not at
//! all: the caller never sees a partially populated table.

use std::io::{self, Read, Write};

use crate::error::{DiskError, Result};
use crate::store::SECTOR_SIZE;

use super::table::{Sector, SectorTable};

/// Major version written to and required from overlay files
pub const VERSION_MAJOR: i32 = 1;

/// Minor version written to and required from overlay files
pub const VERSION_MINOR: i32 = 0;

/// Header size: VersionMajor (4) + VersionMinor (4)
pub const HEADER_SIZE: usize = 8;

/// Record size: SectorIndex (8) + Payload (512)
pub const RECORD_SIZE: usize = 8 + SECTOR_SIZE;

/// Upper bound on the capacity reserved up front from an untrusted count
const MAX_PREALLOC: u64 = 1 << 16;

/// Write a complete overlay image (header, count, records in ascending order)
pub fn encode<W: Write>(table: &SectorTable, writer: &mut W) -> Result<()> {
    writer.write_all(&VERSION_MAJOR.to_be_bytes())?;
    writer.write_all(&VERSION_MINOR.to_be_bytes())?;
    writer.write_all(&(table.len() as u64).to_be_bytes())?;

    for (index, sector) in table.iter_sorted() {
        writer.write_all(&index.to_be_bytes())?;
        writer.write_all(sector)?;
    }

    Ok(())
}

/// Read the version pair without validating it
pub fn read_header<R: Read>(reader: &mut R) -> Result<(i32, i32)> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_format(reader, &mut header, "header")?;

    let major = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let minor = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Ok((major, minor))
}

/// Decode a complete overlay image
///
/// Fails with `Format` on a version mismatch, truncation, a duplicate
/// sector index or bytes left over after the last record.
pub fn decode<R: Read>(reader: &mut R) -> Result<SectorTable> {
    let (major, minor) = read_header(reader)?;
    if (major, minor) != (VERSION_MAJOR, VERSION_MINOR) {
        return Err(DiskError::Format(format!(
            "unsupported overlay version {}.{} (expected {}.{})",
            major, minor, VERSION_MAJOR, VERSION_MINOR
        )));
    }

    let mut count_bytes = [0u8; 8];
    read_exact_or_format(reader, &mut count_bytes, "sector count")?;
    let count = u64::from_be_bytes(count_bytes);

    let mut table = SectorTable::with_capacity(count.min(MAX_PREALLOC) as usize);
    let mut index_bytes = [0u8; 8];
    for _ in 0..count {
        read_exact_or_format(reader, &mut index_bytes, "sector index")?;
        let index = u64::from_be_bytes(index_bytes);

        let mut sector: Box<Sector> = Box::new([0u8; SECTOR_SIZE]);
        read_exact_or_format(reader, &mut sector[..], "sector payload")?;

        if table.insert(index, sector).is_some() {
            return Err(DiskError::Format(format!(
                "duplicate record for sector {}",
                index
            )));
        }
    }

    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(DiskError::Format(format!(
            "trailing data after {} sector records",
            count
        )));
    }

    Ok(table)
}

/// `read_exact` that reports a short read as a structural error
fn read_exact_or_format<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DiskError::Format(format!("truncated {}", what)),
        _ => DiskError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> SectorTable {
        let mut table = SectorTable::default();
        table.insert(4, Box::new([0x44; SECTOR_SIZE]));
        table.insert(1, Box::new([0x11; SECTOR_SIZE]));
        table
    }

    #[test]
    fn encoded_layout_is_big_endian_and_sorted() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE + 8 + 2 * RECORD_SIZE);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &2u64.to_be_bytes());
        // Lowest sector index first
        assert_eq!(&bytes[16..24], &1u64.to_be_bytes());
        assert_eq!(bytes[24], 0x11);
        assert_eq!(&bytes[16 + RECORD_SIZE..24 + RECORD_SIZE], &4u64.to_be_bytes());
    }

    #[test]
    fn decode_restores_table() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();

        let table = decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(table, sample_table());
    }

    #[test]
    fn decode_empty_table() {
        let mut bytes = Vec::new();
        encode(&SectorTable::default(), &mut bytes).unwrap();

        assert_eq!(bytes.len(), 16);
        assert!(decode(&mut bytes.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_other_version() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();
        bytes[7] = 1; // minor = 1

        let err = decode(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DiskError::Format(_)));
    }

    #[test]
    fn decode_rejects_missing_header() {
        let err = decode(&mut [0u8, 0, 0].as_slice()).unwrap_err();
        assert!(matches!(err, DiskError::Format(_)));
    }

    #[test]
    fn decode_rejects_truncated_record() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();
        bytes.truncate(bytes.len() - 100);

        let err = decode(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DiskError::Format(msg) if msg.contains("truncated")));
    }

    #[test]
    fn decode_rejects_duplicate_sector() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();
        // Rewrite the second record's index to match the first
        bytes[16 + RECORD_SIZE..24 + RECORD_SIZE].copy_from_slice(&1u64.to_be_bytes());

        let err = decode(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DiskError::Format(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = Vec::new();
        encode(&sample_table(), &mut bytes).unwrap();
        bytes.push(0);

        let err = decode(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DiskError::Format(msg) if msg.contains("trailing")));
    }
}
