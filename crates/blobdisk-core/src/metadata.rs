//! Metadata files describing remote objects.
//!
//! Every logical file on a remote disk is backed by a small local file
//! listing the remote objects that hold its bytes, the hard-link reference
//! count and a read-only flag. The format is little-endian and versioned;
//! all three historical versions are read, only the newest is written.
//!
//! Layout, in order: format version (`u32`), object count (`u32`), then per
//! object a path length (`u32`), the path bytes and the object size
//! (`u64`), then the reference count (`u32`) and, from version 3 on, the
//! read-only flag (`u8`).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use blobdisk_common::{DiskRoots, Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Object paths are absolute remote paths.
pub const VERSION_ABSOLUTE_PATHS: u32 = 1;
/// Object paths are relative to the disk's remote root.
pub const VERSION_RELATIVE_PATHS: u32 = 2;
/// Adds the trailing read-only flag.
pub const VERSION_READ_ONLY_FLAG: u32 = 3;

const CURRENT_VERSION: u32 = VERSION_READ_ONLY_FLAG;

// Smallest possible encoding of one object entry: empty path, 4-byte
// length, 8-byte size.
const MIN_OBJECT_ENCODING: usize = 12;

/// One remote object holding part of a logical file's bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object path relative to the disk's remote root.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
}

/// In-memory form of one metadata file.
#[derive(Clone, Debug)]
pub struct Metadata {
    roots: Arc<DiskRoots>,
    /// Metadata file path relative to the local root.
    path: String,
    /// Remote objects in concatenation order.
    pub objects: Vec<RemoteObject>,
    /// Sum of all object sizes.
    pub total_size: u64,
    /// Number of local hard links sharing this record.
    pub ref_count: u32,
    /// Content writes are rejected while set.
    pub read_only: bool,
}

impl Metadata {
    /// Start an empty record for `path`; nothing is persisted until
    /// [`save`](Self::save) is called.
    #[must_use]
    pub fn create(roots: Arc<DiskRoots>, path: impl Into<String>) -> Self {
        Self {
            roots,
            path: path.into(),
            objects: Vec::new(),
            total_size: 0,
            ref_count: 1,
            read_only: false,
        }
    }

    /// Load the record stored at `path`, or start an empty one when
    /// `create` is set.
    pub fn load(roots: Arc<DiskRoots>, path: impl Into<String>, create: bool) -> Result<Self> {
        let path = path.into();
        if create {
            return Ok(Self::create(roots, path));
        }
        let local = roots.local_path(&path);
        let data = match fs::read(&local) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(roots, path, &data)
    }

    fn parse(roots: Arc<DiskRoots>, path: String, data: &[u8]) -> Result<Self> {
        let mut buf = data;
        if buf.remaining() < 8 {
            return Err(Error::corrupt(&path, "truncated header"));
        }
        let version = buf.get_u32_le();
        if !(VERSION_ABSOLUTE_PATHS..=VERSION_READ_ONLY_FLAG).contains(&version) {
            return Err(Error::corrupt(&path, format!("unknown version {version}")));
        }
        let object_count = buf.get_u32_le() as usize;
        if object_count > buf.remaining() / MIN_OBJECT_ENCODING {
            return Err(Error::corrupt(
                &path,
                format!("object count {object_count} does not fit the file"),
            ));
        }
        let mut objects = Vec::with_capacity(object_count);
        let mut total_size = 0u64;
        for _ in 0..object_count {
            if buf.remaining() < 4 {
                return Err(Error::corrupt(&path, "truncated object entry"));
            }
            let path_len = buf.get_u32_le() as usize;
            if buf.remaining() < path_len + 8 {
                return Err(Error::corrupt(&path, "truncated object entry"));
            }
            let mut raw = vec![0u8; path_len];
            buf.copy_to_slice(&mut raw);
            let object_path = String::from_utf8(raw)
                .map_err(|_| Error::corrupt(&path, "object path is not valid UTF-8"))?;
            let size = buf.get_u64_le();
            let object_path = if version == VERSION_ABSOLUTE_PATHS {
                match roots.strip_remote(&object_path) {
                    Some(relative) => relative.to_string(),
                    None => {
                        return Err(Error::corrupt(
                            &path,
                            format!("object path {object_path} is outside the remote root"),
                        ));
                    }
                }
            } else {
                object_path
            };
            total_size = total_size
                .checked_add(size)
                .ok_or_else(|| Error::corrupt(&path, "object sizes overflow"))?;
            objects.push(RemoteObject {
                path: object_path,
                size,
            });
        }
        if buf.remaining() < 4 {
            return Err(Error::corrupt(&path, "truncated reference count"));
        }
        let ref_count = buf.get_u32_le();
        let read_only = if version >= VERSION_READ_ONLY_FLAG {
            if buf.remaining() < 1 {
                return Err(Error::corrupt(&path, "truncated read-only flag"));
            }
            buf.get_u8() != 0
        } else {
            false
        };
        Ok(Self {
            roots,
            path,
            objects,
            total_size,
            ref_count,
            read_only,
        })
    }

    /// Append one object and grow the total size; nothing is persisted.
    pub fn add_object(&mut self, path: impl Into<String>, size: u64) {
        self.total_size += size;
        self.objects.push(RemoteObject {
            path: path.into(),
            size,
        });
    }

    fn to_bytes(&self) -> Bytes {
        let paths_len: usize = self.objects.iter().map(|o| o.path.len()).sum();
        let mut buf = BytesMut::with_capacity(13 + self.objects.len() * MIN_OBJECT_ENCODING + paths_len);
        buf.put_u32_le(CURRENT_VERSION);
        buf.put_u32_le(self.objects.len() as u32);
        for object in &self.objects {
            buf.put_u32_le(object.path.len() as u32);
            buf.put_slice(object.path.as_bytes());
            buf.put_u64_le(object.size);
        }
        buf.put_u32_le(self.ref_count);
        buf.put_u8(u8::from(self.read_only));
        buf.freeze()
    }

    /// Rewrite the metadata file in place, always in the newest format.
    ///
    /// The file is truncated and rewritten rather than replaced by rename:
    /// hard-linked names share its inode, and a rename would detach them
    /// from the record. `durable` flushes the bytes to stable storage
    /// before returning.
    pub fn save(&self, durable: bool) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.local_path())?;
        file.write_all(&self.to_bytes())?;
        if durable {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Metadata file path relative to the local root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute path of the metadata file on local storage.
    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        self.roots.local_path(&self.path)
    }

    /// Full remote path of one of this record's objects.
    #[must_use]
    pub fn remote_path(&self, object: &RemoteObject) -> String {
        self.roots.full_remote(&object.path)
    }
}
