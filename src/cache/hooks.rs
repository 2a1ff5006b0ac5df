//! Notification contract for cache lifecycle events.
//!
//! The engine calls these synchronously after the store has been changed. Hosts
//! that need asynchronous dispatch queue the event themselves.

use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::domain::entities::CacheEntryRecord;
use crate::domain::types::{BundleId, SiteId};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::hooks";

/// Address and label of a hard-deleted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedEntry {
    pub key_name: String,
    pub key_label: String,
    pub bundle_id: BundleId,
    pub session_id: Option<String>,
    pub site_id: SiteId,
}

impl From<&CacheEntryRecord> for DeletedEntry {
    fn from(record: &CacheEntryRecord) -> Self {
        Self {
            key_name: record.key_name.clone(),
            key_label: record.key_label.clone(),
            bundle_id: record.bundle_id,
            session_id: record.session_id.clone(),
            site_id: record.site_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Delete(DeletedEntry),
    Prune(Vec<CacheEntryRecord>),
    FlushCache(SiteId),
}

pub trait CacheHooks: Send + Sync {
    /// One call per hard-deleted row, except rows removed by a prune pass.
    fn on_delete(&self, entry: &DeletedEntry);

    /// Once per prune pass with every expired row it removes.
    fn on_prune(&self, expired: &[CacheEntryRecord]);

    fn on_flush_cache(&self, site_id: SiteId);
}

/// Logs each notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl CacheHooks for TracingHooks {
    fn on_delete(&self, entry: &DeletedEntry) {
        info!(
            target: "stash::cache::hooks",
            key_name = %entry.key_name,
            key_label = %entry.key_label,
            bundle_id = entry.bundle_id,
            session_id = entry.session_id.as_deref().unwrap_or_default(),
            site_id = entry.site_id,
            "Cache entry deleted"
        );
    }

    fn on_prune(&self, expired: &[CacheEntryRecord]) {
        info!(
            target: "stash::cache::hooks",
            count = expired.len(),
            "Expired cache entries pruned"
        );
    }

    fn on_flush_cache(&self, site_id: SiteId) {
        info!(target: "stash::cache::hooks", site_id, "Site cache flushed");
    }
}

/// Collects every notification in order.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        mutex_lock(&self.events, SOURCE, "events").clone()
    }

    /// Return and clear the recorded events.
    pub fn take(&self) -> Vec<HookEvent> {
        std::mem::take(&mut *mutex_lock(&self.events, SOURCE, "take"))
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        mutex_lock(&self.events, SOURCE, "deleted_keys")
            .iter()
            .filter_map(|event| match event {
                HookEvent::Delete(entry) => Some(entry.key_name.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: HookEvent) {
        mutex_lock(&self.events, SOURCE, "push").push(event);
    }
}

impl CacheHooks for RecordingHooks {
    fn on_delete(&self, entry: &DeletedEntry) {
        self.push(HookEvent::Delete(entry.clone()));
    }

    fn on_prune(&self, expired: &[CacheEntryRecord]) {
        self.push(HookEvent::Prune(expired.to_vec()));
    }

    fn on_flush_cache(&self, site_id: SiteId) {
        self.push(HookEvent::FlushCache(site_id));
    }
}
