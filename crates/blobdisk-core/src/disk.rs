//! Remote disk facade.
//!
//! Presents filesystem semantics over a remote object store. Every logical
//! file is a local metadata file (see [`crate::metadata`]); filesystem
//! operations read, mutate and rewrite metadata. Remote objects are only
//! ever touched when a final hard link disappears, and then through
//! batched deletions running on the disk's executor.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use blobdisk_common::{DiskRoots, Error, RemoteDiskConfig, Result, WriteMode};
use tracing::{debug, info, warn};

use crate::backend::RemoteBackend;
use crate::executor::{TaskExecutor, TaskHandle};
use crate::locks::PathLocks;
use crate::metadata::Metadata;
use crate::path_batcher::PathBatcher;
use crate::reservation::{Reservation, ReservationLedger};

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Logical path of the entry; directories carry a trailing `/`.
    pub path: String,
    /// Bare entry name.
    pub name: String,
}

impl DirEntry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Lazy, forward-only traversal of one directory of the metadata tree.
#[derive(Debug)]
pub struct DirectoryIterator {
    inner: fs::ReadDir,
    base: String,
}

impl Iterator for DirectoryIterator {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        let is_dir = match entry.file_type() {
            Ok(file_type) => file_type.is_dir(),
            Err(e) => return Some(Err(e.into())),
        };
        // Entry names must round-trip through the relative paths handed
        // back to callers; a lossy conversion would point removal at a
        // path that does not exist.
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                return Some(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-UTF-8 file name {raw:?}"),
                )
                .into()));
            }
        };
        let mut path = if self.base.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", self.base, name)
        };
        if is_dir {
            path.push('/');
        }
        Some(Ok(DirEntry { path, name }))
    }
}

/// Background deletions spawned by one removal operation.
///
/// [`wait`](Self::wait) turns the removal synchronous. Dropping the cleanup
/// instead makes it fire-and-forget: failures were already logged by the
/// executor workers, but remote objects may be left behind.
#[derive(Debug)]
#[must_use = "dropping a cleanup makes its remote deletions fire-and-forget"]
pub struct RemoteCleanup {
    tasks: Vec<TaskHandle>,
}

impl RemoteCleanup {
    fn empty() -> Self {
        Self { tasks: Vec::new() }
    }

    fn extend(&mut self, other: RemoteCleanup) {
        self.tasks.extend(other.tasks);
    }

    /// Number of deletion batches still in flight.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the removal left nothing to delete remotely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Block until every deletion batch finishes; the first failure wins.
    pub fn wait(self) -> Result<()> {
        let mut first_err = None;
        for task in self.tasks {
            if let Err(e) = task.wait() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Disk facade over a remote object store.
pub struct RemoteDisk {
    name: String,
    roots: Arc<DiskRoots>,
    backend: Arc<dyn RemoteBackend>,
    executor: TaskExecutor,
    ledger: Arc<ReservationLedger>,
    locks: PathLocks,
}

impl RemoteDisk {
    /// Open the local metadata tree (creating it if needed) and build the
    /// disk around `backend`.
    pub fn new(config: RemoteDiskConfig, backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        let RemoteDiskConfig {
            name,
            remote_root,
            local_root,
            executor_threads,
        } = config;
        fs::create_dir_all(&local_root)?;
        let roots = Arc::new(DiskRoots::new(remote_root, local_root));
        info!(
            "disk {}: metadata tree at {}, remote root {}",
            name,
            roots.local_root().display(),
            roots.remote_root
        );
        Ok(Self {
            executor: TaskExecutor::new(format!("{name}-remote-ops"), executor_threads),
            ledger: Arc::new(ReservationLedger::new(name.clone())),
            locks: PathLocks::new(),
            name,
            roots,
            backend,
        })
    }

    /// Disk name, as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root of the local metadata tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.roots.local_root()
    }

    /// Remote root prefix objects live under.
    #[must_use]
    pub fn remote_root(&self) -> &str {
        &self.roots.remote_root
    }

    /// Remote disks are modeled as unbounded.
    #[must_use]
    pub fn total_space(&self) -> u64 {
        u64::MAX
    }

    #[must_use]
    pub fn available_space(&self) -> u64 {
        u64::MAX
    }

    #[must_use]
    pub fn unreserved_space(&self) -> u64 {
        u64::MAX
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.roots.local_path(path)
    }

    /// Whether `path` exists in the local metadata tree.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.full_path(path).exists()
    }

    #[must_use]
    pub fn is_file(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    #[must_use]
    pub fn is_directory(&self, path: &str) -> bool {
        self.full_path(path).is_dir()
    }

    /// Logical file size: the sum of the file's remote object sizes.
    pub fn file_size(&self, path: &str) -> Result<u64> {
        Ok(self.read_meta(path)?.total_size)
    }

    /// Read the metadata record backing `path`.
    ///
    /// Takes the file's identity lock so a concurrent in-place rewrite is
    /// never observed half-written.
    pub fn read_meta(&self, path: &str) -> Result<Metadata> {
        let _guard = self.locks.lock(&self.full_path(path));
        Metadata::load(Arc::clone(&self.roots), path, false)
    }

    /// Start an empty metadata record for `path`; nothing is persisted
    /// until the record is saved.
    #[must_use]
    pub fn create_meta(&self, path: &str) -> Metadata {
        Metadata::create(Arc::clone(&self.roots), path)
    }

    /// Bare names of the entries inside a directory.
    pub fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.iterate_directory(path)?
            .map(|entry| entry.map(|e| e.name))
            .collect()
    }

    /// Iterate one directory of the metadata tree.
    pub fn iterate_directory(&self, path: &str) -> Result<DirectoryIterator> {
        let inner = fs::read_dir(self.full_path(path)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(path.to_string())
            } else {
                e.into()
            }
        })?;
        Ok(DirectoryIterator {
            inner,
            base: path.trim_matches('/').to_string(),
        })
    }

    /// Last modification time of the metadata file.
    pub fn last_modified(&self, path: &str) -> Result<SystemTime> {
        Ok(fs::metadata(self.full_path(path))?.modified()?)
    }

    /// Stamp the metadata file with a modification time.
    pub fn set_last_modified(&self, path: &str, time: SystemTime) -> Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.full_path(path))?;
        file.set_modified(time)?;
        Ok(())
    }

    /// Create an empty logical file.
    pub fn create_file(&self, path: &str) -> Result<()> {
        let _guard = self.locks.lock(&self.full_path(path));
        self.create_meta(path).save(false)
    }

    /// Create a directory node; directories exist only in the local tree.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        fs::create_dir(self.full_path(path))?;
        Ok(())
    }

    /// Create a directory node and any missing parents.
    pub fn create_directories(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    /// Hard-link `dst` to `src`'s metadata record.
    ///
    /// Both names resolve to one shared file afterwards: one object set,
    /// one reference count.
    pub fn create_hard_link(&self, src: &str, dst: &str) -> Result<()> {
        let src_full = self.full_path(src);
        let _guard = self.locks.lock(&src_full);
        let mut meta = Metadata::load(Arc::clone(&self.roots), src, false)?;
        meta.ref_count += 1;
        meta.save(false)?;
        fs::hard_link(&src_full, self.full_path(dst))?;
        Ok(())
    }

    /// Rename a logical file; reference counts and remote objects are
    /// untouched.
    pub fn move_file(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.full_path(from), self.full_path(to))?;
        Ok(())
    }

    /// Rename a directory subtree.
    pub fn move_directory(&self, from: &str, to: &str) -> Result<()> {
        self.move_file(from, to)
    }

    /// Move `from` over `to`, discarding whatever `to` referenced.
    pub fn replace_file(&self, from: &str, to: &str) -> Result<RemoteCleanup> {
        if self.exists(to) {
            let old_path = format!("{to}.old");
            self.move_file(to, &old_path)?;
            self.move_file(from, to)?;
            self.remove_file(&old_path)
        } else {
            self.move_file(from, to)?;
            Ok(RemoteCleanup::empty())
        }
    }

    /// Remove one path, deleting newly unreferenced remote objects.
    pub fn remove_file(&self, path: &str) -> Result<RemoteCleanup> {
        self.remove_shared_file(path, false)
    }

    /// Remove one path if it exists.
    pub fn remove_file_if_exists(&self, path: &str) -> Result<RemoteCleanup> {
        if self.exists(path) {
            self.remove_shared_file(path, false)
        } else {
            Ok(RemoteCleanup::empty())
        }
    }

    /// Remove one hard link. `keep_in_remote` leaves the remote objects in
    /// place even when the last link disappears.
    pub fn remove_shared_file(&self, path: &str, keep_in_remote: bool) -> Result<RemoteCleanup> {
        let mut batcher = if keep_in_remote {
            None
        } else {
            Some(self.backend.path_batcher()?)
        };
        self.remove_meta(path, batcher.as_mut())?;
        Ok(self.dispatch(batcher))
    }

    /// Remove a subtree and the remote objects it exclusively referenced.
    pub fn remove_recursive(&self, path: &str) -> Result<RemoteCleanup> {
        self.remove_shared_recursive(path, false)
    }

    /// Remove a whole subtree, gathering every doomed remote object into
    /// one round of batched deletions.
    pub fn remove_shared_recursive(
        &self,
        path: &str,
        keep_in_remote: bool,
    ) -> Result<RemoteCleanup> {
        let mut batcher = if keep_in_remote {
            None
        } else {
            Some(self.backend.path_batcher()?)
        };
        self.remove_meta_recursive(path, batcher.as_mut())?;
        Ok(self.dispatch(batcher))
    }

    /// Remove every file directly inside `path`; subdirectories stay.
    pub fn clear_directory(&self, path: &str) -> Result<RemoteCleanup> {
        let entries: Vec<DirEntry> = self.iterate_directory(path)?.collect::<Result<_>>()?;
        let mut cleanup = RemoteCleanup::empty();
        for entry in entries {
            if !entry.is_dir() {
                cleanup.extend(self.remove_shared_file(&entry.path, false)?);
            }
        }
        Ok(cleanup)
    }

    /// Remove an empty directory node.
    pub fn remove_directory(&self, path: &str) -> Result<()> {
        fs::remove_dir(self.full_path(path))?;
        Ok(())
    }

    /// Mark a file read-only.
    ///
    /// The flag lives inside the metadata file rather than in local
    /// permissions: hard links share and keep rewriting that file.
    pub fn set_read_only(&self, path: &str) -> Result<()> {
        let _guard = self.locks.lock(&self.full_path(path));
        let mut meta = Metadata::load(Arc::clone(&self.roots), path, false)?;
        meta.read_only = true;
        meta.save(false)
    }

    /// Fetch or start the metadata record behind a content write.
    ///
    /// Rewrite mode pushes the existing file through the shared removal
    /// path first; the returned cleanup carries those deletions. The fresh
    /// record is saved immediately so size queries work while a writer is
    /// still streaming objects.
    pub fn read_or_create_meta(
        &self,
        path: &str,
        mode: WriteMode,
    ) -> Result<(Metadata, RemoteCleanup)> {
        let mut cleanup = RemoteCleanup::empty();
        if self.exists(path) {
            {
                let _guard = self.locks.lock(&self.full_path(path));
                let meta = Metadata::load(Arc::clone(&self.roots), path, false)?;
                if meta.read_only {
                    return Err(Error::ReadOnly(path.to_string()));
                }
                if mode == WriteMode::Append {
                    return Ok((meta, cleanup));
                }
            }
            // Rewrite: the old objects become garbage once unreferenced.
            cleanup = self.remove_file(path)?;
        }
        let _guard = self.locks.lock(&self.full_path(path));
        let meta = self.create_meta(path);
        meta.save(false)?;
        Ok((meta, cleanup))
    }

    /// Claim advisory space; always succeeds on a remote disk.
    pub fn reserve(&self, bytes: u64) -> Reservation {
        self.ledger.reserve(bytes)
    }

    /// Sum of live reservation claims.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.ledger.reserved_bytes()
    }

    /// Number of live reservations.
    #[must_use]
    pub fn reservation_count(&self) -> u64 {
        self.ledger.reservation_count()
    }

    /// Resize the pool running background remote operations.
    pub fn set_executor_threads(&self, threads: usize) {
        self.executor.set_max_threads(threads);
    }

    fn remove_meta(&self, path: &str, batcher: Option<&mut PathBatcher>) -> Result<()> {
        debug!("disk {}: removing {}", self.name, path);
        let full = self.full_path(path);
        let _guard = self.locks.lock(&full);
        if !full.exists() {
            return Err(Error::NotFound(path.to_string()));
        }
        if !full.is_file() {
            return Err(Error::NotAFile(path.to_string()));
        }
        match Metadata::load(Arc::clone(&self.roots), path, false) {
            Ok(mut meta) => {
                meta.ref_count = meta.ref_count.saturating_sub(1);
                if meta.ref_count > 0 {
                    // Surviving hard links keep the shared record and the
                    // remote objects.
                    meta.save(false)?;
                    fs::remove_file(&full)?;
                } else {
                    fs::remove_file(&full)?;
                    if let Some(batcher) = batcher {
                        for object in &meta.objects {
                            batcher.add_path(meta.remote_path(object));
                        }
                    }
                }
                Ok(())
            }
            Err(e) if e.is_corrupt_metadata() => {
                // The object list is unrecoverable; drop the local file and
                // leak the remote objects instead of wedging removal.
                warn!("disk {}: removing {} with unreadable metadata: {}", self.name, path, e);
                fs::remove_file(&full)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remove_meta_recursive(
        &self,
        path: &str,
        mut batcher: Option<&mut PathBatcher>,
    ) -> Result<()> {
        let full = self.full_path(path);
        if full.is_file() {
            return self.remove_meta(path, batcher);
        }
        let entries: Vec<DirEntry> = self.iterate_directory(path)?.collect::<Result<_>>()?;
        for entry in entries {
            self.remove_meta_recursive(entry.path.trim_end_matches('/'), batcher.as_deref_mut())?;
        }
        fs::remove_dir(&full)?;
        Ok(())
    }

    fn dispatch(&self, batcher: Option<PathBatcher>) -> RemoteCleanup {
        let Some(batcher) = batcher else {
            return RemoteCleanup::empty();
        };
        if batcher.is_empty() {
            return RemoteCleanup::empty();
        }
        debug!(
            "disk {}: deleting {} remote objects in {} batches",
            self.name,
            batcher.len(),
            batcher.batches().len()
        );
        let tasks = batcher
            .into_batches()
            .into_iter()
            .map(|batch| {
                let backend = Arc::clone(&self.backend);
                self.executor.execute(move || backend.remove_batch(&batch))
            })
            .collect();
        RemoteCleanup { tasks }
    }
}
