//! Blobdisk Common - Shared types and utilities
//!
//! This crate provides the error type, root-path sharing, and configuration
//! structures used across the blobdisk crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::RemoteDiskConfig;
pub use error::{Error, Result};
pub use types::{DiskRoots, WriteMode};
