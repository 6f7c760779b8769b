//! Batching of remote object paths for bulk deletion.
//!
//! Bulk-delete APIs cap how many objects one request may name, while a
//! single recursive removal can doom an unbounded number of objects. The
//! batcher sits between the two: removal code appends paths one by one and
//! the result is a list of request-sized batches.

/// Accumulates remote object paths into bounded batches.
#[derive(Debug)]
pub struct PathBatcher {
    chunk_limit: usize,
    batches: Vec<Vec<String>>,
}

impl PathBatcher {
    /// Create a batcher whose batches hold at most `chunk_limit` paths.
    ///
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(chunk_limit: usize) -> Self {
        Self {
            chunk_limit: chunk_limit.max(1),
            batches: Vec::new(),
        }
    }

    /// Append one path, opening a fresh batch when the current one is full.
    pub fn add_path(&mut self, path: impl Into<String>) {
        match self.batches.last_mut() {
            Some(batch) if batch.len() < self.chunk_limit => batch.push(path.into()),
            _ => self.batches.push(vec![path.into()]),
        }
    }

    /// Maximum number of paths per batch.
    #[must_use]
    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    /// Whether no paths have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of collected paths across all batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// The batches collected so far, in insertion order.
    #[must_use]
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// Consume the batcher, yielding the batches for dispatch.
    #[must_use]
    pub fn into_batches(self) -> Vec<Vec<String>> {
        self.batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batcher() {
        let batcher = PathBatcher::new(10);
        assert!(batcher.is_empty());
        assert_eq!(batcher.len(), 0);
        assert!(batcher.into_batches().is_empty());
    }

    #[test]
    fn test_batches_respect_chunk_limit() {
        let mut batcher = PathBatcher::new(3);
        for i in 0..10 {
            batcher.add_path(format!("data/obj-{i}"));
        }
        assert_eq!(batcher.len(), 10);
        let batches = batcher.into_batches();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[3].len(), 1);
    }

    #[test]
    fn test_batches_preserve_insertion_order() {
        let mut batcher = PathBatcher::new(2);
        batcher.add_path("a");
        batcher.add_path("b");
        batcher.add_path("c");
        let flat: Vec<String> = batcher.into_batches().into_iter().flatten().collect();
        assert_eq!(flat, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_zero_chunk_limit_is_clamped() {
        let mut batcher = PathBatcher::new(0);
        assert_eq!(batcher.chunk_limit(), 1);
        batcher.add_path("a");
        batcher.add_path("b");
        assert_eq!(batcher.batches().len(), 2);
    }
}
