//! In-process repositories.
//!
//! Behaves like the Postgres adapter, including the unique addressing index and the
//! key-name regex predicate, over locked vectors. Used by tests and by hosts that
//! embed the engine without a database.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;

use crate::application::repos::{
    BundlesRepo, EntriesRepo, EntriesWriteRepo, EntryFilter, EntryUpdate, ExpiryChange,
    NewCacheEntry, RepoError,
};
use crate::cache::mutex_lock;
use crate::domain::entities::{BundleRecord, CacheEntryRecord};
use crate::domain::types::{BundleId, DEFAULT_BUNDLES, SiteId};

const SOURCE: &str = "infra::memory";

#[derive(Debug)]
struct MemoryState {
    entries: Vec<CacheEntryRecord>,
    bundles: Vec<BundleRecord>,
    next_entry_id: i64,
    next_bundle_id: BundleId,
}

impl MemoryState {
    fn address_taken(&self, entry: &NewCacheEntry) -> bool {
        let session = entry.session_id.as_deref().unwrap_or_default();
        self.entries.iter().any(|row| {
            row.key_name == entry.key_name
                && row.bundle_id == entry.bundle_id
                && row.site_id == entry.site_id
                && row.session_id.as_deref().unwrap_or_default() == session
        })
    }
}

#[derive(Debug)]
pub struct InMemoryRepositories {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl Default for InMemoryRepositories {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepositories {
    /// Empty store with the default bundles registered.
    pub fn new() -> Self {
        let bundles = DEFAULT_BUNDLES
            .iter()
            .map(|(id, name, label)| BundleRecord {
                id: *id,
                name: (*name).to_string(),
                label: (*label).to_string(),
            })
            .collect::<Vec<_>>();
        let next_bundle_id = bundles.iter().map(|bundle| bundle.id).max().unwrap_or(0) + 1;

        Self {
            state: Mutex::new(MemoryState {
                entries: Vec::new(),
                bundles,
                next_entry_id: 1,
                next_bundle_id,
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with a persistence error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store a row directly, bypassing the unique index. An `id` of 0 is assigned.
    pub fn seed_entry(&self, mut record: CacheEntryRecord) -> i64 {
        let mut state = mutex_lock(&self.state, SOURCE, "seed_entry");
        if record.id == 0 {
            record.id = state.next_entry_id;
        }
        state.next_entry_id = state.next_entry_id.max(record.id + 1);
        let id = record.id;
        state.entries.push(record);
        state.entries.sort_by_key(|row| row.id);
        id
    }

    /// All rows ordered by id.
    pub fn entries_snapshot(&self) -> Vec<CacheEntryRecord> {
        mutex_lock(&self.state, SOURCE, "entries_snapshot")
            .entries
            .clone()
    }

    pub fn entry_count(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "entry_count").entries.len()
    }

    fn ensure_available(&self) -> Result<(), RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepoError::from_persistence("in-memory store marked unavailable"))
        } else {
            Ok(())
        }
    }

    fn matching(&self, filter: &EntryFilter) -> Result<Vec<CacheEntryRecord>, RepoError> {
        self.ensure_available()?;
        let pattern = filter
            .key_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| RepoError::invalid_input(format!("invalid regular expression: {err}")))?;

        let state = mutex_lock(&self.state, SOURCE, "matching");
        Ok(state
            .entries
            .iter()
            .filter(|row| {
                row.site_id == filter.site_id
                    && filter
                        .key_name
                        .as_ref()
                        .is_none_or(|key_name| &row.key_name == key_name)
                    && filter.bundle_id.is_none_or(|bundle| bundle == row.bundle_id)
                    && filter.session.matches(row.session_id.as_deref())
                    && pattern.as_ref().is_none_or(|regex| regex.is_match(&row.key_name))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntriesRepo for InMemoryRepositories {
    async fn find_entry(&self, filter: &EntryFilter) -> Result<Option<CacheEntryRecord>, RepoError> {
        Ok(self.matching(filter)?.into_iter().next())
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut rows = self.matching(filter)?;
        if let Some(limit) = filter.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(rows)
    }

    async fn list_expired(&self, now: i64) -> Result<Vec<CacheEntryRecord>, RepoError> {
        self.ensure_available()?;
        let state = mutex_lock(&self.state, SOURCE, "list_expired");
        Ok(state
            .entries
            .iter()
            .filter(|row| row.is_prunable_at(now))
            .cloned()
            .collect())
    }

    async fn count_entries(&self, bundle_id: BundleId, site_id: SiteId) -> Result<u64, RepoError> {
        self.ensure_available()?;
        let state = mutex_lock(&self.state, SOURCE, "count_entries");
        let count = state
            .entries
            .iter()
            .filter(|row| row.bundle_id == bundle_id && row.site_id == site_id)
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl EntriesWriteRepo for InMemoryRepositories {
    async fn insert_entries(&self, entries: &[NewCacheEntry]) -> Result<u64, RepoError> {
        self.ensure_available()?;
        let mut state = mutex_lock(&self.state, SOURCE, "insert_entries");
        let mut inserted = 0;
        for entry in entries {
            if state.address_taken(entry) {
                continue;
            }
            let id = state.next_entry_id;
            state.next_entry_id += 1;
            state.entries.push(CacheEntryRecord {
                id,
                key_name: entry.key_name.clone(),
                bundle_id: entry.bundle_id,
                session_id: entry.session_id.clone(),
                site_id: entry.site_id,
                created: entry.created,
                expire: entry.expire,
                parameters: entry.parameters.clone(),
                key_label: entry.key_label.clone(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update_entry(&self, update: &EntryUpdate) -> Result<u64, RepoError> {
        self.ensure_available()?;
        let mut state = mutex_lock(&self.state, SOURCE, "update_entry");
        let mut updated = 0;
        for row in state.entries.iter_mut().filter(|row| {
            row.key_name == update.key_name
                && row.bundle_id == update.bundle_id
                && row.site_id == update.site_id
                && update
                    .session_id
                    .as_deref()
                    .is_none_or(|session| row.session_id.as_deref() == Some(session))
        }) {
            row.expire = update.expire;
            if let Some(parameters) = update.parameters.as_ref() {
                row.parameters.clone_from(parameters);
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn set_expiries(&self, changes: &[ExpiryChange]) -> Result<u64, RepoError> {
        self.ensure_available()?;
        let mut state = mutex_lock(&self.state, SOURCE, "set_expiries");
        let mut updated = 0;
        for change in changes {
            if let Some(row) = state.entries.iter_mut().find(|row| row.id == change.id) {
                row.expire = change.expire;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_entries(&self, ids: &[i64]) -> Result<u64, RepoError> {
        self.ensure_available()?;
        let mut state = mutex_lock(&self.state, SOURCE, "delete_entries");
        let before = state.entries.len();
        state.entries.retain(|row| !ids.contains(&row.id));
        Ok((before - state.entries.len()) as u64)
    }
}

#[async_trait]
impl BundlesRepo for InMemoryRepositories {
    async fn find_bundle_by_name(&self, name: &str) -> Result<Option<BundleRecord>, RepoError> {
        self.ensure_available()?;
        let state = mutex_lock(&self.state, SOURCE, "find_bundle_by_name");
        Ok(state.bundles.iter().find(|bundle| bundle.name == name).cloned())
    }

    async fn find_bundle_by_id(&self, id: BundleId) -> Result<Option<BundleRecord>, RepoError> {
        self.ensure_available()?;
        let state = mutex_lock(&self.state, SOURCE, "find_bundle_by_id");
        Ok(state.bundles.iter().find(|bundle| bundle.id == id).cloned())
    }

    async fn create_bundle(&self, name: &str, label: &str) -> Result<BundleRecord, RepoError> {
        self.ensure_available()?;
        let mut state = mutex_lock(&self.state, SOURCE, "create_bundle");
        if let Some(existing) = state.bundles.iter().find(|bundle| bundle.name == name) {
            return Ok(existing.clone());
        }
        let bundle = BundleRecord {
            id: state.next_bundle_id,
            name: name.to_string(),
            label: label.to_string(),
        };
        state.next_bundle_id += 1;
        state.bundles.push(bundle.clone());
        Ok(bundle)
    }
}
