//! Blobdisk Core - remote disk metadata layer
//!
//! Presents a disk over a remote object store: every logical file is a
//! small local metadata file listing the remote objects that hold its
//! bytes. Filesystem operations (create, move, hard-link, remove, list)
//! rewrite metadata only; physical deletion of remote objects happens
//! later, batched, on a bounded pool of worker threads.
//!
//! The entry point is [`disk::RemoteDisk`], built from a
//! [`RemoteDiskConfig`](blobdisk_common::RemoteDiskConfig) and a
//! [`backend::RemoteBackend`] implementation.

pub mod backend;
pub mod disk;
pub mod executor;
mod locks;
pub mod metadata;
pub mod path_batcher;
pub mod reservation;

pub use backend::{MemoryBackend, RemoteBackend, UnsupportedBackend, DEFAULT_CHUNK_LIMIT};
pub use disk::{DirEntry, DirectoryIterator, RemoteCleanup, RemoteDisk};
pub use executor::{TaskExecutor, TaskHandle};
pub use metadata::{
    Metadata, RemoteObject, VERSION_ABSOLUTE_PATHS, VERSION_READ_ONLY_FLAG, VERSION_RELATIVE_PATHS,
};
pub use path_batcher::PathBatcher;
pub use reservation::{Reservation, ReservationLedger};
