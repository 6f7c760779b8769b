//! Per-file locking for metadata read-modify-writes.
//!
//! Decrementing a reference count is a read-modify-write of a file that
//! other hard links share; two racing removals could otherwise both read
//! the same count and either double-delete the remote objects or leak
//! them. Locks are keyed by file identity (device and inode) so that
//! hard-linked names contend on one lock, with a path-hash key standing in
//! while the file does not exist yet.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

const STRIPES: usize = 64;

#[derive(Debug, PartialEq, Eq, Hash)]
enum LockKey {
    Node(u64, u64),
    Name(u64),
}

/// Striped locks covering the local metadata tree.
pub(crate) struct PathLocks {
    stripes: Vec<Mutex<()>>,
}

impl PathLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe covering `path`'s current identity.
    pub(crate) fn lock(&self, path: &Path) -> MutexGuard<'_, ()> {
        loop {
            let key = Self::key_for(path);
            let guard = self.stripes[Self::stripe(&key)].lock();
            // The file may have been created or unlinked while we waited;
            // hold the stripe only if it still matches the identity.
            if Self::key_for(path) == key {
                return guard;
            }
        }
    }

    fn key_for(path: &Path) -> LockKey {
        match fs::metadata(path) {
            Ok(meta) => LockKey::Node(meta.dev(), meta.ino()),
            Err(_) => {
                let mut hasher = DefaultHasher::new();
                path.hash(&mut hasher);
                LockKey::Name(hasher.finish())
            }
        }
    }

    fn stripe(key: &LockKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % STRIPES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_links_share_a_stripe() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::hard_link(&a, &b).unwrap();

        assert_eq!(PathLocks::key_for(&a), PathLocks::key_for(&b));
        assert_eq!(
            PathLocks::stripe(&PathLocks::key_for(&a)),
            PathLocks::stripe(&PathLocks::key_for(&b)),
        );
    }

    #[test]
    fn test_missing_file_keys_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost");
        let before = PathLocks::key_for(&path);
        assert!(matches!(before, LockKey::Name(_)));
        assert_eq!(before, PathLocks::key_for(&path));

        fs::write(&path, b"x").unwrap();
        assert!(matches!(PathLocks::key_for(&path), LockKey::Node(_, _)));
    }

    #[test]
    fn test_lock_follows_identity_change() {
        let locks = PathLocks::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appearing");
        {
            let _guard = locks.lock(&path);
        }
        fs::write(&path, b"x").unwrap();
        {
            let _guard = locks.lock(&path);
        }
    }
}
