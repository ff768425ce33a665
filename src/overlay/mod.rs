//! Overlay Module
//!
//! Copy-on-write layer that shadows sectors of a child block store.
//!
//! ## Responsibilities
//! - Answer reads from owned sectors, fall through to the child otherwise
//! - Prime a sector from the child on its first write
//! - Save the delta to, and load it from, a dedicated overlay file
//! - Commit the delta into the child (writeback)
//!
//! ## Stacking
//! ```text
//!   read(O) ──► Outer ──miss──► Inner ──miss──► DirectStore
//!                 │               │
//!                hit             hit
//!                 ▼               ▼
//!            outer sector    inner sector
//! ```
//! The child may itself be an overlay. Each miss costs one hop per layer.
//!
//! ## State
//! ```text
//!   Unopened ──open() ok──► Ready ──open() fails──► Failed
//!       │                                            ▲
//!       └────────────────open() fails────────────────┘
//! ```
//! `new` starts in Ready. Only Ready accepts read/write/save/writeback.

pub mod format;
mod table;

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::error::{DiskError, Result};
use crate::store::{check_offset, check_range, clamp_len, sealed, sector_of, BlockStore, SECTOR_SIZE};

pub use table::{Sector, SectorTable};

/// Borrowed handle to the store beneath an overlay
///
/// The overlay never owns its child; the caller that built the stack keeps it
/// alive. A shared child can sit under several overlays at once but cannot
/// receive a writeback.
pub enum ChildRef<'c> {
    Shared(&'c dyn BlockStore),
    Exclusive(&'c mut dyn BlockStore),
}

impl<'c> ChildRef<'c> {
    pub fn shared(store: &'c dyn BlockStore) -> Self {
        ChildRef::Shared(store)
    }

    pub fn exclusive(store: &'c mut dyn BlockStore) -> Self {
        ChildRef::Exclusive(store)
    }

    fn get(&self) -> &(dyn BlockStore + 'c) {
        match self {
            ChildRef::Shared(store) => *store,
            ChildRef::Exclusive(store) => &**store,
        }
    }

    fn get_mut(&mut self) -> Option<&mut (dyn BlockStore + 'c)> {
        match self {
            ChildRef::Shared(_) => None,
            ChildRef::Exclusive(store) => Some(&mut **store),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Bound to a file that has not been loaded yet
    Unopened,
    Ready,
    /// Loading failed; the instance must be discarded
    Failed,
}

/// Copy-on-write block store over a child
pub struct OverlayStore<'c> {
    /// Diagnostic label
    name: String,
    /// Store consulted on a miss and targeted by writeback
    child: ChildRef<'c>,
    /// Sectors owned by this layer
    table: SectorTable,
    /// Overlay file, if the delta is persistent
    image_file: Option<PathBuf>,
    /// Reject writes and saves when set
    read_only: bool,
    state: State,
    /// Table differs from the overlay file
    dirty: bool,
}

impl<'c> OverlayStore<'c> {
    /// Create an empty, ephemeral overlay
    ///
    /// `hash_size` is the initial sector table capacity.
    pub fn new(name: impl Into<String>, child: ChildRef<'c>, hash_size: usize) -> Self {
        Self {
            name: name.into(),
            child,
            table: SectorTable::with_capacity(hash_size),
            image_file: None,
            read_only: false,
            state: State::Ready,
            dirty: false,
        }
    }

    /// Create an overlay bound to an overlay file
    ///
    /// The store is not usable until [`open`](Self::open) succeeds.
    pub fn with_backing_file(
        name: impl Into<String>,
        child: ChildRef<'c>,
        hash_size: usize,
        path: impl Into<PathBuf>,
        read_only: bool,
    ) -> Self {
        Self {
            name: name.into(),
            child,
            table: SectorTable::with_capacity(hash_size),
            image_file: Some(path.into()),
            read_only,
            state: State::Unopened,
            dirty: false,
        }
    }

    /// Load the overlay file if it exists, otherwise start empty
    ///
    /// A read-only overlay has nothing to start from when its file is
    /// missing, so that case is an I/O error.
    pub fn open_or_create(
        name: impl Into<String>,
        child: ChildRef<'c>,
        hash_size: usize,
        path: impl Into<PathBuf>,
        read_only: bool,
    ) -> Result<Self> {
        let path = path.into();
        let exists = path.exists();
        let mut store = Self::with_backing_file(name, child, hash_size, path, read_only);

        if exists {
            store.open()?;
        } else if read_only {
            return Err(DiskError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("read-only overlay file {} does not exist", store.file_display()),
            )));
        } else {
            info!(store = %store.name, path = %store.file_display(), "starting empty overlay");
            store.state = State::Ready;
        }

        Ok(store)
    }

    /// Build an overlay from configuration
    pub fn from_config(config: &OverlayConfig, child: ChildRef<'c>) -> Result<Self> {
        match &config.image_file {
            Some(path) => Self::open_or_create(
                config.name.clone(),
                child,
                config.table_size,
                path.clone(),
                config.read_only,
            ),
            None => {
                let mut store = Self::new(config.name.clone(), child, config.table_size);
                store.read_only = config.read_only;
                Ok(store)
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Load the sector table from the overlay file
    ///
    /// The file is decoded into a fresh table which replaces the current one
    /// only on success. Any failure empties the table and leaves the store
    /// unusable.
    pub fn open(&mut self) -> Result<()> {
        if self.state == State::Failed {
            return Err(DiskError::Uninitialized(self.name.clone()));
        }
        let path = self.backing_path()?.to_path_buf();

        let loaded = Self::load(&path).and_then(|table| {
            Self::check_bounds(&table, self.child.get())?;
            Ok(table)
        });

        match loaded {
            Ok(table) => {
                info!(
                    store = %self.name,
                    path = %path.display(),
                    sectors = table.len(),
                    "loaded overlay"
                );
                self.table = table;
                self.state = State::Ready;
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                warn!(store = %self.name, path = %path.display(), error = %e, "failed to load overlay");
                self.table.clear();
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn load(path: &Path) -> Result<SectorTable> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        format::decode(&mut reader)
    }

    /// Reject records that lie past the end of the child
    fn check_bounds(table: &SectorTable, child: &dyn BlockStore) -> Result<()> {
        let limit = child.size()?.div_ceil(SECTOR_SIZE as u64);
        match table.indices_sorted().last() {
            Some(&index) if index >= limit => Err(DiskError::Format(format!(
                "sector {} lies past the end of {} ({} sectors)",
                index,
                child.name(),
                limit
            ))),
            _ => Ok(()),
        }
    }

    /// Rewrite the overlay file with the current table
    pub fn save(&mut self) -> Result<()> {
        self.ensure_ready()?;
        if self.read_only {
            return Err(DiskError::ReadOnly(self.name.clone()));
        }
        let path = self.backing_path()?.to_path_buf();

        self.save_to(&path)?;
        self.dirty = false;
        Ok(())
    }

    /// Write the current table to an arbitrary overlay file
    ///
    /// The file is truncated and rewritten in place; a crash midway leaves it
    /// incomplete.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let path = path.as_ref();

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        format::encode(&self.table, &mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| DiskError::Io(e.into_error()))?;
        file.sync_all()?;

        info!(
            store = %self.name,
            path = %path.display(),
            sectors = self.table.len(),
            "saved overlay"
        );
        Ok(())
    }

    /// Commit every owned sector into the child
    ///
    /// Sectors are written in ascending order. A failure midway leaves the
    /// child partially updated. Returns the number of sectors written.
    pub fn writeback(&mut self) -> Result<usize> {
        self.ensure_ready()?;
        let child = self
            .child
            .get_mut()
            .ok_or_else(|| DiskError::ReadOnly(format!("{}: child is shared", self.name)))?;
        let size = child.size()?;

        let mut written = 0;
        for (index, sector) in self.table.iter_sorted() {
            let offset = index
                .checked_mul(SECTOR_SIZE as u64)
                .ok_or_else(|| DiskError::Format(format!("sector index {} overflows", index)))?;
            let len = clamp_len(offset, SECTOR_SIZE, size);
            child.write(&sector[..len], offset)?;
            written += 1;
        }

        info!(
            store = %self.name,
            child = %child.name(),
            sectors = written,
            "wrote overlay back to child"
        );
        Ok(written)
    }

    /// Drop the in-memory delta without touching the child or the file
    pub fn discard(&mut self) {
        if !self.table.is_empty() {
            debug!(store = %self.name, sectors = self.table.len(), "discarding delta");
            self.dirty = true;
        }
        self.table.clear();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of sectors owned by this layer
    pub fn sector_count(&self) -> usize {
        self.table.len()
    }

    /// Whether this layer owns `index`
    pub fn is_mapped(&self, index: u64) -> bool {
        self.table.contains(index)
    }

    /// Owned sector indices in ascending order
    pub fn mapped_sectors(&self) -> Vec<u64> {
        self.table.indices_sorted()
    }

    /// CRC32 over the delta (index and payload, ascending index order)
    pub fn fingerprint(&self) -> u32 {
        self.table.fingerprint()
    }

    /// The store beneath this overlay
    pub fn child(&self) -> &(dyn BlockStore + 'c) {
        self.child.get()
    }

    /// Overlay file, if any
    pub fn backing_file(&self) -> Option<&Path> {
        self.image_file.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the table has changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            State::Ready => Ok(()),
            _ => Err(DiskError::Uninitialized(self.name.clone())),
        }
    }

    fn backing_path(&self) -> Result<&Path> {
        self.image_file
            .as_deref()
            .ok_or_else(|| DiskError::Config(format!("{}: no overlay file configured", self.name)))
    }

    fn file_display(&self) -> String {
        self.image_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// Read the child's current content of sector `index`.
    /// Bytes past the end of the child stay zero.
    fn prime(child: &dyn BlockStore, index: u64, size: u64) -> Result<Box<Sector>> {
        let mut sector: Box<Sector> = Box::new([0u8; SECTOR_SIZE]);
        let offset = index * SECTOR_SIZE as u64;
        let len = clamp_len(offset, SECTOR_SIZE, size);

        let read = child.read(&mut sector[..len], offset)?;
        if read < len {
            return Err(DiskError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read priming sector {} from {}", index, child.name()),
            )));
        }

        debug!(sector = index, child = %child.name(), "primed sector");
        Ok(sector)
    }
}

impl sealed::Sealed for OverlayStore<'_> {}

impl BlockStore for OverlayStore<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.state == State::Ready
    }

    fn size(&self) -> Result<u64> {
        self.child.get().size()
    }

    fn read(&self, data: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_ready()?;
        let size = self.size()?;
        check_offset(offset, data.len(), size)?;
        let len = clamp_len(offset, data.len(), size);

        let mut pos = 0;
        while pos < len {
            let abs = offset + pos as u64;
            let (index, within) = sector_of(abs);
            let mut chunk = (SECTOR_SIZE - within).min(len - pos);

            if let Some(sector) = self.table.get(index) {
                data[pos..pos + chunk].copy_from_slice(&sector[within..within + chunk]);
                pos += chunk;
                continue;
            }

            // Coalesce the run of unmapped sectors into one child read
            let mut next = index + 1;
            while pos + chunk < len && !self.table.contains(next) {
                chunk = (chunk + SECTOR_SIZE).min(len - pos);
                next += 1;
            }

            let read = self.child.get().read(&mut data[pos..pos + chunk], abs)?;
            if read < chunk {
                return Ok(pos + read);
            }
            pos += chunk;
        }

        Ok(len)
    }

    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.ensure_ready()?;
        if self.read_only {
            return Err(DiskError::ReadOnly(self.name.clone()));
        }
        let size = self.size()?;
        check_range(offset, data.len(), size)?;

        let child = self.child.get();
        if data.is_empty() {
            return Ok(0);
        }

        // Prime every missing sector before splicing, so a failed prime
        // leaves the table untouched
        let (first, _) = sector_of(offset);
        let (last, _) = sector_of(offset + data.len() as u64 - 1);
        let mut primed = Vec::new();
        for index in first..=last {
            if !self.table.contains(index) {
                primed.push((index, Self::prime(child, index, size)?));
            }
        }
        for (index, sector) in primed {
            self.table.insert(index, sector);
        }

        let mut pos = 0;
        while pos < data.len() {
            let abs = offset + pos as u64;
            let (index, within) = sector_of(abs);
            let chunk = (SECTOR_SIZE - within).min(data.len() - pos);

            let sector = self
                .table
                .get_or_try_insert_with(index, || Self::prime(child, index, size))?;
            sector[within..within + chunk].copy_from_slice(&data[pos..pos + chunk]);

            self.dirty = true;
            pos += chunk;
        }

        Ok(data.len())
    }
}

impl fmt::Debug for OverlayStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayStore")
            .field("name", &self.name)
            .field("child", &self.child.get().name())
            .field("sectors", &self.table.len())
            .field("image_file", &self.image_file)
            .field("read_only", &self.read_only)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for OverlayStore<'_> {
    fn drop(&mut self) {
        if self.dirty && self.image_file.is_some() {
            warn!(
                store = %self.name,
                sectors = self.table.len(),
                "dropping overlay with unsaved changes"
            );
        }
    }
}
