//! Error types for cowdisk
//!
//! Provides a unified error type for every block store.

use thiserror::Error;

/// Result type alias using DiskError
pub type Result<T> = std::result::Result<T, DiskError>;

/// Unified error type for block store operations
#[derive(Debug, Error)]
pub enum DiskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Overlay File Errors
    // -------------------------------------------------------------------------
    #[error("Overlay format error: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Access Errors
    // -------------------------------------------------------------------------
    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    #[error("Out of range: offset={offset} len={len} size={size}")]
    OutOfRange { offset: u64, len: usize, size: u64 },

    #[error("Store not initialized: {0}")]
    Uninitialized(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
