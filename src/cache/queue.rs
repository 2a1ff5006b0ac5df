//! Deferred write queue.
//!
//! Sets issued during a unit of work are coalesced here and written in one flush.
//! Inserts are first-wins: a key already queued for insert is refused. Updates are
//! last-wins: a repeated update replaces the queued record in its original slot, so
//! the flush applies one update per key in first-queued order. An update that only
//! moves the expiry does not drop a value queued before it.

use std::collections::HashMap;

use crate::application::repos::{EntryUpdate, NewCacheEntry};

use super::keys::CacheKey;

/// Insertion-ordered map of pending records.
#[derive(Debug)]
struct PendingWrites<T> {
    records: Vec<(CacheKey, T)>,
    index: HashMap<CacheKey, usize>,
}

impl<T> Default for PendingWrites<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> PendingWrites<T> {
    fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key)
    }

    fn get(&self, key: &CacheKey) -> Option<&T> {
        self.index.get(key).map(|&slot| &self.records[slot].1)
    }

    fn push_new(&mut self, key: CacheKey, record: T) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.records.len());
        self.records.push((key, record));
        true
    }

    fn upsert(&mut self, key: CacheKey, record: T) {
        match self.index.get(&key) {
            Some(&slot) => self.records[slot].1 = record,
            None => {
                self.index.insert(key.clone(), self.records.len());
                self.records.push((key, record));
            }
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&CacheKey) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|(key, _)| keep(key));
        if self.records.len() != before {
            self.index = self
                .records
                .iter()
                .enumerate()
                .map(|(slot, (key, _))| (key.clone(), slot))
                .collect();
        }
        before - self.records.len()
    }

    fn take(&mut self) -> Vec<(CacheKey, T)> {
        self.index.clear();
        std::mem::take(&mut self.records)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Everything queued in a unit of work, in flush order.
#[derive(Debug, Default)]
pub struct DrainedWrites {
    pub inserts: Vec<(CacheKey, NewCacheEntry)>,
    pub updates: Vec<(CacheKey, EntryUpdate)>,
}

impl DrainedWrites {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    inserts: PendingWrites<NewCacheEntry>,
    updates: PendingWrites<EntryUpdate>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert. Returns `false` when the key is already queued for insert.
    pub fn enqueue_insert(&mut self, key: CacheKey, record: NewCacheEntry) -> bool {
        self.inserts.push_new(key, record)
    }

    /// Queue an update, replacing any earlier queued update for the key.
    ///
    /// An expiry-only update keeps the value of the update it replaces.
    pub fn enqueue_update(&mut self, key: CacheKey, mut record: EntryUpdate) {
        if record.parameters.is_none()
            && let Some(pending) = self.updates.get(&key)
        {
            record.parameters.clone_from(&pending.parameters);
        }
        self.updates.upsert(key, record);
    }

    pub fn has_insert(&self, key: &CacheKey) -> bool {
        self.inserts.contains(key)
    }

    pub fn pending_update(&self, key: &CacheKey) -> Option<&EntryUpdate> {
        self.updates.get(key)
    }

    /// Drop queued writes whose key satisfies `matches`. Returns how many were dropped.
    pub fn discard_where(&mut self, mut matches: impl FnMut(&CacheKey) -> bool) -> usize {
        self.inserts.retain(|key| !matches(key)) + self.updates.retain(|key| !matches(key))
    }

    /// Take all queued writes, leaving the queue empty.
    pub fn drain(&mut self) -> DrainedWrites {
        DrainedWrites {
            inserts: self.inserts.take(),
            updates: self.updates.take(),
        }
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.drain();
    }
}
