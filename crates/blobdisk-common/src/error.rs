//! Error types for blobdisk
//!
//! This module defines the common error type used throughout the disk layer.

use thiserror::Error;

/// Common result type for blobdisk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for blobdisk
#[derive(Debug, Error)]
pub enum Error {
    // Local metadata errors
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("corrupt metadata file {path}: {reason}")]
    CorruptMetadata { path: String, reason: String },

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("file is read-only: {0}")]
    ReadOnly(String),

    // Local storage errors
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Backend errors
    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("remote backend error: {0}")]
    Backend(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a corrupt-metadata error
    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptMetadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-supported error
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a corrupt-metadata error
    #[must_use]
    pub fn is_corrupt_metadata(&self) -> bool {
        matches!(self, Self::CorruptMetadata { .. })
    }
}
