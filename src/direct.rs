//! Direct Store
//!
//! A block store backed 1:1 by a host file (a raw disk image).
//!
//! ## Responsibilities
//! - Own the host file handle (open / close / reopen)
//! - Compute and cache the image size
//! - Byte-addressed reads and writes at absolute offsets
//!
//! The image never grows: writes past the end of the file are rejected, so
//! every overlay stacked on top sees a fixed geometry.

use std::cell::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DiskError, Result};
use crate::store::{check_offset, check_range, clamp_len, sealed, BlockStore};

/// Block store reading and writing a host file directly
///
/// Reads go through `&File` (which implements `Read + Seek`), so they only
/// need `&self`. The cached size lives in a `OnceCell`, which keeps the store
/// `Send` but not `Sync`: one thread drives a stack at a time.
#[derive(Debug)]
pub struct DirectStore {
    /// Diagnostic label
    name: String,
    /// Open host file; `None` once closed or after a failed reopen
    file: Option<File>,
    /// Path of the image file
    path: PathBuf,
    /// Reject writes when set
    read_only: bool,
    /// End-of-file position, computed on first use
    total_size: OnceCell<u64>,
}

impl DirectStore {
    /// Open an existing image file
    ///
    /// The file is opened read-write unless `read_only` is set; failing to
    /// obtain the requested access is an I/O error.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut store = Self {
            name: name.into(),
            file: None,
            path: path.to_path_buf(),
            read_only,
            total_size: OnceCell::new(),
        };
        store.reopen(path, read_only)?;
        Ok(store)
    }

    /// Create (or truncate) a zero-filled image of `size` bytes and open it
    /// read-write
    pub fn create(name: impl Into<String>, path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        file.sync_all()?;
        drop(file);

        Self::open(name, path, false)
    }

    /// Bind this store to a (possibly different) file
    ///
    /// Any current handle is released first and the cached size is
    /// discarded. If the new file cannot be opened the store stays closed.
    pub fn reopen(&mut self, path: impl AsRef<Path>, read_only: bool) -> Result<()> {
        self.close();

        let path = path.as_ref();
        self.path = path.to_path_buf();
        self.read_only = read_only;
        self.total_size = OnceCell::new();

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        self.file = Some(file);

        debug!(
            store = %self.name,
            path = %self.path.display(),
            read_only,
            "opened disk image"
        );
        Ok(())
    }

    /// Release the file handle. Closing a closed store does nothing.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(store = %self.name, "closed disk image");
        }
    }

    /// Flush written data to stable storage
    pub fn sync(&self) -> Result<()> {
        self.handle()?.sync_all()?;
        Ok(())
    }

    /// Path of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether writes are rejected
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn handle(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| DiskError::Uninitialized(self.name.clone()))
    }
}

impl sealed::Sealed for DirectStore {}

impl BlockStore for DirectStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.file.is_some()
    }

    fn size(&self) -> Result<u64> {
        let mut file = self.handle()?;
        if let Some(&size) = self.total_size.get() {
            return Ok(size);
        }

        let size = file.seek(SeekFrom::End(0))?;
        let _ = self.total_size.set(size);
        Ok(size)
    }

    fn read(&self, data: &mut [u8], offset: u64) -> Result<usize> {
        let size = self.size()?;
        check_offset(offset, data.len(), size)?;
        let len = clamp_len(offset, data.len(), size);

        let mut file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data[..len])?;
        Ok(len)
    }

    fn write(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.handle()?;
        if self.read_only {
            return Err(DiskError::ReadOnly(self.name.clone()));
        }
        let size = self.size()?;
        check_range(offset, data.len(), size)?;

        let mut file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }
}
