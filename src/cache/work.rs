//! Per-unit-of-work state.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use super::keys::CacheKey;
use super::queue::WriteQueue;
use super::reads::ReadCache;

/// State owned by one request or job.
///
/// Create one per unit of work with [`CacheStore::begin`](super::CacheStore::begin), pass it
/// to every operation, and call [`CacheStore::flush`](super::CacheStore::flush) exactly once
/// at the end. Dropping it without flushing discards the queued writes.
#[derive(Debug)]
pub struct WorkUnit {
    pub(crate) queue: WriteQueue,
    pub(crate) reads: ReadCache,
    pub(crate) inserted: HashSet<CacheKey>,
}

impl WorkUnit {
    pub fn new(read_cache_limit: NonZeroUsize) -> Self {
        Self {
            queue: WriteQueue::new(),
            reads: ReadCache::new(read_cache_limit),
            inserted: HashSet::new(),
        }
    }

    /// Whether `key` was queued for insert during this unit of work.
    pub fn is_inserted_key(&self, key: &CacheKey) -> bool {
        self.inserted.contains(key)
    }

    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    pub fn memoized_reads(&self) -> usize {
        self.reads.len()
    }

    /// Empty all state so a pooled worker can start a fresh unit of work.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.reads.clear();
        self.inserted.clear();
    }
}
