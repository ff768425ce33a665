//! Configuration for overlay stores
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Default hash capacity hint, in sectors
pub const DEFAULT_TABLE_SIZE: usize = 65536;

/// Configuration for an [`OverlayStore`](crate::overlay::OverlayStore)
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Diagnostic label reported in errors and log events
    pub name: String,

    /// Initial capacity of the sector table (number of sectors)
    pub table_size: usize,

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------
    /// Overlay file holding the saved delta. `None` means the overlay is
    /// ephemeral and its delta is lost when it is dropped.
    pub image_file: Option<PathBuf>,

    /// Reject writes to the overlay and saves to its file
    pub read_only: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            name: "cow".to_string(),
            table_size: DEFAULT_TABLE_SIZE,
            image_file: None,
            read_only: false,
        }
    }
}

impl OverlayConfig {
    /// Create a new config builder
    pub fn builder() -> OverlayConfigBuilder {
        OverlayConfigBuilder::default()
    }
}

/// Builder for OverlayConfig
#[derive(Default)]
pub struct OverlayConfigBuilder {
    config: OverlayConfig,
}

impl OverlayConfigBuilder {
    /// Set the diagnostic label
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the sector table capacity hint
    pub fn table_size(mut self, sectors: usize) -> Self {
        self.config.table_size = sectors;
        self
    }

    /// Bind the overlay to a backing file
    pub fn image_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.image_file = Some(path.into());
        self
    }

    /// Mark the overlay read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn build(self) -> OverlayConfig {
        self.config
    }
}
