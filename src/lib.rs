//! # cowdisk
//!
//! Layered block storage for simulated disk devices:
//! - A uniform `size` / `read` / `write` contract over byte-addressed storage
//! - Raw host-file images ([`DirectStore`])
//! - Stackable copy-on-write overlays ([`OverlayStore`]) that never touch the
//!   layer beneath them until an explicit writeback
//! - A versioned binary format for saving and restoring an overlay's delta
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Simulated disk controller                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ read / write (absolute byte offsets)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 OverlayStore (outer)        ◄──► overlay file│
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ miss / writeback
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 OverlayStore (inner, optional)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ miss / writeback
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 DirectStore                 ◄──► raw image   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod store;
pub mod direct;
pub mod overlay;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DiskError, Result};
pub use config::OverlayConfig;
pub use store::{BlockStore, SECTOR_SIZE};
pub use direct::DirectStore;
pub use overlay::{ChildRef, OverlayStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of cowdisk
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
