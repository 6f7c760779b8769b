//! Configuration types for blobdisk
//!
//! This module defines the configuration structure for a single remote disk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one remote disk instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteDiskConfig {
    /// Disk name (human-readable identifier, used in logs)
    pub name: String,
    /// Remote root: URI plus object directory, with trailing delimiter
    /// (e.g. "s3://bucket/cluster1/data/")
    pub remote_root: String,
    /// Local directory holding the metadata tree
    pub local_root: PathBuf,
    /// Worker threads for background remote operations
    pub executor_threads: usize,
}

impl Default for RemoteDiskConfig {
    fn default() -> Self {
        Self {
            name: "remote".to_string(),
            remote_root: String::new(),
            local_root: PathBuf::from("/var/lib/blobdisk/metadata"),
            executor_threads: 16,
        }
    }
}

impl RemoteDiskConfig {
    /// Create a config with the given name and roots, default pool size
    pub fn new(
        name: impl Into<String>,
        remote_root: impl Into<String>,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            remote_root: remote_root.into(),
            local_root: local_root.into(),
            ..Default::default()
        }
    }

    /// Set the executor thread count
    #[must_use]
    pub fn with_executor_threads(mut self, threads: usize) -> Self {
        self.executor_threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemoteDiskConfig::default();
        assert_eq!(config.name, "remote");
        assert_eq!(config.executor_threads, 16);
    }

    #[test]
    fn test_builder() {
        let config =
            RemoteDiskConfig::new("s3_cold", "s3://bucket/data/", "/tmp/meta").with_executor_threads(4);
        assert_eq!(config.name, "s3_cold");
        assert_eq!(config.remote_root, "s3://bucket/data/");
        assert_eq!(config.executor_threads, 4);
    }
}
