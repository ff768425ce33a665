//! Sector table
//!
//! Sparse map from sector index to an owned 512-byte buffer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::Result;
use crate::store::SECTOR_SIZE;

/// One sector's worth of bytes
pub type Sector = [u8; SECTOR_SIZE];

/// Sparse set of sectors owned by an overlay
///
/// Lookups go through a `HashMap`; ordered access (`iter_sorted`) is only
/// used where a stable order matters, i.e. when the table is serialized or
/// committed to a child.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SectorTable {
    sectors: HashMap<u64, Box<Sector>>,
}

impl SectorTable {
    /// Create an empty table sized for `capacity` sectors
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sectors: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, index: u64) -> Option<&Sector> {
        self.sectors.get(&index).map(|s| &**s)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.sectors.contains_key(&index)
    }

    /// Insert a sector, returning the buffer it replaced
    pub fn insert(&mut self, index: u64, sector: Box<Sector>) -> Option<Box<Sector>> {
        self.sectors.insert(index, sector)
    }

    /// Get a sector for mutation, filling a missing slot from `prime` first.
    ///
    /// If `prime` fails the table is left unchanged.
    pub fn get_or_try_insert_with<F>(&mut self, index: u64, prime: F) -> Result<&mut Sector>
    where
        F: FnOnce() -> Result<Box<Sector>>,
    {
        match self.sectors.entry(index) {
            Entry::Occupied(entry) => Ok(&mut **entry.into_mut()),
            Entry::Vacant(entry) => Ok(&mut **entry.insert(prime()?)),
        }
    }

    /// Number of mapped sectors
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Drop every buffer
    pub fn clear(&mut self) {
        self.sectors.clear();
    }

    /// Mapped sector indices in ascending order
    pub fn indices_sorted(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.sectors.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// CRC32 over (index, payload) pairs in ascending index order
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for (index, sector) in self.iter_sorted() {
            hasher.update(&index.to_be_bytes());
            hasher.update(sector);
        }
        hasher.finalize()
    }

    /// Iterate over (index, sector) in ascending index order
    pub fn iter_sorted(&self) -> impl Iterator<Item = (u64, &Sector)> + '_ {
        self.indices_sorted()
            .into_iter()
            .filter_map(move |index| self.get(index).map(|sector| (index, sector)))
    }
}
