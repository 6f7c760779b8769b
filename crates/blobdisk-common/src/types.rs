//! Core type definitions for blobdisk
//!
//! This module defines the fundamental types shared between the metadata
//! format and the disk facade.

use std::path::{Path, PathBuf};

/// Root paths of one remote disk, shared by every metadata record it produces.
///
/// `remote_root` is the backend-specific prefix (URI plus object directory)
/// that turns a root-relative object path into a full remote path; it carries
/// its own trailing delimiter, so joining is plain concatenation.
/// `local_root` is the directory holding the local metadata tree.
///
/// One instance is owned by the disk and handed out behind an `Arc`; metadata
/// records never copy the strings.
#[derive(Clone, Debug)]
pub struct DiskRoots {
    pub remote_root: String,
    pub local_root: PathBuf,
}

impl DiskRoots {
    pub fn new(remote_root: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
        }
    }

    /// Full remote path for a root-relative object path.
    #[must_use]
    pub fn full_remote(&self, relative: &str) -> String {
        format!("{}{}", self.remote_root, relative)
    }

    /// Strip `remote_root` from an absolute remote path, if it matches.
    #[must_use]
    pub fn strip_remote<'a>(&self, absolute: &'a str) -> Option<&'a str> {
        absolute.strip_prefix(&self.remote_root)
    }

    /// Local filesystem path for a disk-relative logical path.
    ///
    /// A leading `/` denotes the disk root, not the host root.
    #[must_use]
    pub fn local_path(&self, path: &str) -> PathBuf {
        self.local_root.join(path.trim_start_matches('/'))
    }

    /// Root of the local metadata tree.
    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }
}

/// How an existing file is opened for writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep existing remote objects and append new ones after them.
    Append,
    /// Discard the existing remote objects and start over.
    Rewrite,
}
