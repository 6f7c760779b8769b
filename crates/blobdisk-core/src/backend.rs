//! Remote store hooks for physical deletion.
//!
//! All metadata bookkeeping is backend-agnostic; the only thing a disk
//! needs from its store is the ability to delete batches of objects and a
//! sensible batch size. Read-only stores plug in [`UnsupportedBackend`]
//! and simply never delete anything.

use std::collections::HashSet;

use blobdisk_common::{Error, Result};
use parking_lot::Mutex;

use crate::path_batcher::PathBatcher;

/// Default number of objects per bulk-delete request, matching the S3
/// `DeleteObjects` cap.
pub const DEFAULT_CHUNK_LIMIT: usize = 1000;

/// Deletion capability of a remote object store.
pub trait RemoteBackend: Send + Sync {
    /// Construct a batcher sized for this store's bulk-delete requests.
    ///
    /// Fails on stores without a deletion protocol; removals that keep
    /// remote data never ask for one.
    fn path_batcher(&self) -> Result<PathBatcher>;

    /// Physically delete one batch of objects.
    ///
    /// Must be idempotent: an already-absent object is not an error.
    fn remove_batch(&self, paths: &[String]) -> Result<()>;
}

/// Backend for stores that never delete remote data, such as a web-served
/// read-only dataset.
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl RemoteBackend for UnsupportedBackend {
    fn path_batcher(&self) -> Result<PathBatcher> {
        Err(Error::not_supported("backend cannot delete remote objects"))
    }

    fn remove_batch(&self, _paths: &[String]) -> Result<()> {
        Err(Error::not_supported("backend cannot delete remote objects"))
    }
}

/// In-process backend tracking objects in a set.
///
/// Gives tests and embedders full visibility into what was deleted and in
/// which batches.
#[derive(Debug)]
pub struct MemoryBackend {
    chunk_limit: usize,
    objects: Mutex<HashSet<String>>,
    removed_batches: Mutex<Vec<Vec<String>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(chunk_limit: usize) -> Self {
        Self {
            chunk_limit,
            objects: Mutex::new(HashSet::new()),
            removed_batches: Mutex::new(Vec::new()),
        }
    }

    /// Record an object as present in the store.
    pub fn put_object(&self, path: impl Into<String>) {
        self.objects.lock().insert(path.into());
    }

    /// Whether the store still holds `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains(path)
    }

    /// Number of objects currently held.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Every delete batch received, in arrival order.
    #[must_use]
    pub fn removed_batches(&self) -> Vec<Vec<String>> {
        self.removed_batches.lock().clone()
    }

    /// Every path deleted so far, across batches.
    #[must_use]
    pub fn removed_paths(&self) -> Vec<String> {
        self.removed_batches.lock().iter().flatten().cloned().collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_LIMIT)
    }
}

impl RemoteBackend for MemoryBackend {
    fn path_batcher(&self) -> Result<PathBatcher> {
        Ok(PathBatcher::new(self.chunk_limit))
    }

    fn remove_batch(&self, paths: &[String]) -> Result<()> {
        let mut objects = self.objects.lock();
        for path in paths {
            // Deleting an absent object is a no-op, like S3.
            objects.remove(path);
        }
        drop(objects);
        self.removed_batches.lock().push(paths.to_vec());
        Ok(())
    }
}
