//! Per-unit-of-work read memo.

use std::num::NonZeroUsize;

use lru::LruCache;

use super::keys::CacheKey;

/// A memoized lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedRead {
    Value(String),
    /// The store had no row. Distinct from a stored empty string.
    Empty,
}

#[derive(Debug)]
pub struct ReadCache {
    entries: LruCache<CacheKey, CachedRead>,
}

impl ReadCache {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(limit),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<&CachedRead> {
        self.entries.get(key)
    }

    pub fn remember_value(&mut self, key: CacheKey, value: impl Into<String>) {
        self.entries.put(key, CachedRead::Value(value.into()));
    }

    pub fn remember_empty(&mut self, key: CacheKey) {
        self.entries.put(key, CachedRead::Empty);
    }

    /// Drop the miss sentinel for `key`, leaving memoized values alone.
    pub fn forget_empty(&mut self, key: &CacheKey) {
        if matches!(self.entries.peek(key), Some(CachedRead::Empty)) {
            self.entries.pop(key);
        }
    }

    pub fn forget(&mut self, key: &CacheKey) {
        self.entries.pop(key);
    }

    /// Evict every key for which `matches` holds. Returns the number evicted.
    pub fn forget_where(&mut self, mut matches: impl FnMut(&CacheKey) -> bool) -> usize {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ReadCache {
        ReadCache::new(NonZeroUsize::new(8).expect("non-zero"))
    }

    #[test]
    fn empty_sentinel_is_not_an_empty_string() {
        let mut reads = cache();
        let miss = CacheKey::new("miss", 1, 1);
        let blank = CacheKey::new("blank", 1, 1);

        reads.remember_empty(miss.clone());
        reads.remember_value(blank.clone(), "");

        assert_eq!(reads.get(&miss), Some(&CachedRead::Empty));
        assert_eq!(reads.get(&blank), Some(&CachedRead::Value(String::new())));
    }

    #[test]
    fn forget_empty_spares_values() {
        let mut reads = cache();
        let key = CacheKey::new("k", 1, 1);

        reads.remember_value(key.clone(), "v");
        reads.forget_empty(&key);
        assert!(reads.get(&key).is_some());

        reads.remember_empty(key.clone());
        reads.forget_empty(&key);
        assert!(reads.get(&key).is_none());
    }

    #[test]
    fn forget_where_evicts_matching_keys() {
        let mut reads = cache();
        reads.remember_value(CacheKey::new("a", 1, 1), "1");
        reads.remember_value(CacheKey::new("a", 2, 1), "2");
        reads.remember_value(CacheKey::new("b", 1, 1), "3");

        let evicted = reads.forget_where(|key| key.key_name() == "a");
        assert_eq!(evicted, 2);
        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn limit_evicts_least_recently_used() {
        let mut reads = ReadCache::new(NonZeroUsize::new(2).expect("non-zero"));
        let a = CacheKey::new("a", 1, 1);
        let b = CacheKey::new("b", 1, 1);
        let c = CacheKey::new("c", 1, 1);

        reads.remember_value(a.clone(), "1");
        reads.remember_value(b.clone(), "2");
        reads.get(&a);
        reads.remember_value(c.clone(), "3");

        assert!(reads.get(&a).is_some());
        assert!(reads.get(&b).is_none());
        assert!(reads.get(&c).is_some());
    }
}
