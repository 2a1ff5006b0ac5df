//! Cache engine.
//!
//! [`CacheStore`] ties the persistent store, the bundle registry, the static mirror
//! and the per-unit [`WorkUnit`] together. Reads consult the unit's memo before the
//! store; writes are queued on the unit and only reach the store on [`CacheStore::flush`].

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::application::repos::{
    BundlesRepo, EntriesRepo, EntriesWriteRepo, EntryFilter, EntryUpdate, NewCacheEntry,
    SessionFilter,
};
use crate::domain::entities::CacheEntryRecord;
use crate::domain::types::{
    BundleId, EntryColumn, GLOBAL_SESSION, SessionKind, SessionScope, SiteId,
};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::error::CacheError;
use super::hooks::{CacheHooks, DeletedEntry, TracingHooks};
use super::invalidator::StampedeInvalidator;
use super::keys::{CacheKey, uri_of};
use super::mirror::{MirrorError, StaticMirror};
use super::reads::CachedRead;
use super::registry::BundleRegistry;
use super::work::WorkUnit;

const METRIC_READ_HIT: &str = "stash_read_hit_total";
const METRIC_READ_MISS: &str = "stash_read_miss_total";
const METRIC_QUEUE_REJECTED: &str = "stash_queue_rejected_total";
const METRIC_FLUSH_MS: &str = "stash_flush_ms";
const METRIC_PRUNED: &str = "stash_pruned_total";
const METRIC_MIRROR_FAILURE: &str = "stash_mirror_failure_total";

/// Outcome of one [`CacheStore::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Rows written by the batched insert; duplicates already in the store are skipped.
    pub inserted: u64,
    pub updated: u64,
    /// Mirror files written.
    pub mirrored: u64,
}

impl FlushSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct CacheStore {
    config: CacheConfig,
    entries: Arc<dyn EntriesRepo>,
    writes: Arc<dyn EntriesWriteRepo>,
    bundles: BundleRegistry,
    invalidator: StampedeInvalidator,
    mirror: StaticMirror,
    hooks: Arc<dyn CacheHooks>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new<R>(config: CacheConfig, repos: Arc<R>) -> Self
    where
        R: EntriesRepo + EntriesWriteRepo + BundlesRepo + 'static,
    {
        let entries: Arc<dyn EntriesRepo> = repos.clone();
        let writes: Arc<dyn EntriesWriteRepo> = repos.clone();
        let bundles: Arc<dyn BundlesRepo> = repos;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Self {
            mirror: StaticMirror::new(&config),
            invalidator: StampedeInvalidator::new(writes.clone(), clock.clone()),
            bundles: BundleRegistry::new(bundles),
            hooks: Arc::new(TracingHooks),
            config,
            entries,
            writes,
            clock,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CacheHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.invalidator = StampedeInvalidator::new(self.writes.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn bundles(&self) -> &BundleRegistry {
        &self.bundles
    }

    pub fn mirror(&self) -> &StaticMirror {
        &self.mirror
    }

    /// Start a unit of work.
    pub fn begin(&self) -> WorkUnit {
        WorkUnit::new(self.config.read_cache_limit_non_zero())
    }

    /// Absolute expiry for a time-to-live in seconds. Non-positive ttls never expire.
    pub fn expires_in(&self, ttl_seconds: i64) -> i64 {
        if ttl_seconds <= 0 {
            0
        } else {
            self.clock.now().saturating_add(ttl_seconds)
        }
    }

    /// Resolve a bundle name, failing when it is not registered.
    pub async fn bundle_id(&self, name: &str) -> Result<BundleId, CacheError> {
        self.bundles
            .by_name(name)
            .await?
            .ok_or_else(|| CacheError::UnknownBundle {
                name: name.to_string(),
            })
    }

    /// Queue a new entry. A second insert for the same key in one unit of work is refused.
    pub fn insert(
        &self,
        work: &mut WorkUnit,
        key: CacheKey,
        expire: i64,
        value: &str,
        label: &str,
    ) -> Result<(), CacheError> {
        let record = NewCacheEntry {
            key_name: key.key_name().to_string(),
            bundle_id: key.bundle_id(),
            session_id: key.session_id().map(str::to_string),
            site_id: key.site_id(),
            created: self.clock.now(),
            expire,
            parameters: value.to_string(),
            key_label: label.to_string(),
        };

        if !work.queue.enqueue_insert(key.clone(), record) {
            counter!(METRIC_QUEUE_REJECTED).increment(1);
            debug!(key = %key, "Insert already queued");
            return Err(CacheError::AlreadyQueued { key });
        }

        work.inserted.insert(key.clone());
        work.reads.remember_value(key, value);
        Ok(())
    }

    /// Queue an update. `None` keeps the stored value and only moves the expiry.
    pub fn update(&self, work: &mut WorkUnit, key: CacheKey, expire: i64, value: Option<&str>) {
        let record = EntryUpdate {
            key_name: key.key_name().to_string(),
            bundle_id: key.bundle_id(),
            session_id: key.session_id().map(str::to_string),
            site_id: key.site_id(),
            expire,
            parameters: value.map(str::to_string),
        };

        match value {
            Some(value) => work.reads.remember_value(key.clone(), value),
            None => work.reads.forget_empty(&key),
        }
        work.queue.enqueue_update(key, record);
    }

    /// Extend the entry's life to `now + extend_by_seconds`.
    pub fn refresh(&self, work: &mut WorkUnit, key: CacheKey, extend_by_seconds: i64) {
        let expire = self.clock.now().saturating_add(extend_by_seconds);
        self.update(work, key, expire, None);
    }

    pub async fn get(&self, work: &mut WorkUnit, key: &CacheKey) -> Result<Option<String>, CacheError> {
        self.get_column(work, key, EntryColumn::Parameters).await
    }

    /// Read one column of the entry at `key`. Only the value column is memoized.
    pub async fn get_column(
        &self,
        work: &mut WorkUnit,
        key: &CacheKey,
        column: EntryColumn,
    ) -> Result<Option<String>, CacheError> {
        if column == EntryColumn::Parameters
            && let Some(cached) = work.reads.get(key)
        {
            let found = match cached {
                CachedRead::Value(value) => Some(value.clone()),
                CachedRead::Empty => None,
            };
            if found.is_some() {
                counter!(METRIC_READ_HIT, "source" => "memo").increment(1);
            } else {
                counter!(METRIC_READ_MISS, "source" => "memo").increment(1);
            }
            return Ok(found);
        }

        let found = self.fetch(work, key).await?;

        match &found {
            Some(_) => counter!(METRIC_READ_HIT, "source" => "store").increment(1),
            None => counter!(METRIC_READ_MISS, "source" => "store").increment(1),
        }

        if column == EntryColumn::Parameters {
            match &found {
                Some(record) => work.reads.remember_value(key.clone(), record.parameters.clone()),
                None => work.reads.remember_empty(key.clone()),
            }
        }

        Ok(found.map(|record| record.column(column)))
    }

    /// Full record at `key`, bypassing the memo.
    pub async fn get_entry(
        &self,
        work: &mut WorkUnit,
        key: &CacheKey,
    ) -> Result<Option<CacheEntryRecord>, CacheError> {
        self.fetch(work, key).await
    }

    async fn fetch(
        &self,
        work: &mut WorkUnit,
        key: &CacheKey,
    ) -> Result<Option<CacheEntryRecord>, CacheError> {
        let session = key
            .session_id()
            .map_or(SessionFilter::Any, |session| SessionFilter::Exact(session.to_string()));
        let filter = EntryFilter::for_site(key.site_id())
            .key_name(key.key_name())
            .bundle(Some(key.bundle_id()))
            .session(session)
            .limit(1);

        let Some(mut record) = self.entries.find_entry(&filter).await? else {
            return Ok(None);
        };

        if !record.never_expires() {
            let now = self.clock.now();
            let time_to_expiry = record.expire - now;
            if time_to_expiry <= 0 {
                debug!(key = %key, expire = record.expire, now, "Entry read at or after expiry");
                return Ok(None);
            }

            let refresh_period = record.expire - record.created;
            if record.session_kind() == SessionKind::Scoped
                && refresh_period > time_to_expiry.saturating_mul(2)
            {
                debug!(key = %key, refresh_period, time_to_expiry, "Refresh-ahead queued");
                self.refresh(work, key.clone(), refresh_period);
            }
        }

        // Index-only rows are blank; a row holding a value was never mirrored.
        if self.mirror.is_index_only()
            && record.parameters.is_empty()
            && self.bundles.is_static(record.bundle_id).await?
        {
            match self.mirror.read(uri_of(&record.key_name), record.site_id).await {
                Ok(value) => record.parameters = value,
                Err(err) => {
                    self.mirror_failed("read", &record.key_name, record.site_id, &err);
                    return Ok(None);
                }
            }
        }

        Ok(Some(record))
    }

    /// Delete entries named `key_name` on the site, narrowed by bundle and session when given.
    ///
    /// A session other than `_global` limits the match to one row. Writes for the same
    /// address still waiting in `work` are discarded. With `invalidate_delay > 0` the
    /// rows are scheduled to expire across that window instead.
    pub async fn delete(
        &self,
        work: &mut WorkUnit,
        key_name: &str,
        bundle_id: Option<BundleId>,
        session_id: Option<&str>,
        site_id: SiteId,
        invalidate_delay: i64,
    ) -> Result<u64, CacheError> {
        let session_id = session_id.filter(|session| !session.is_empty());

        let mut filter = EntryFilter::for_site(site_id)
            .key_name(key_name)
            .bundle(bundle_id)
            .session(session_id.map_or(SessionFilter::Any, |session| {
                SessionFilter::Exact(session.to_string())
            }));
        if session_id.is_some_and(|session| session != GLOBAL_SESSION) {
            filter = filter.limit(1);
        }

        let matches = |key: &CacheKey| key.matches(key_name, site_id, bundle_id, session_id);
        let discarded = work.queue.discard_where(matches);
        work.inserted.retain(|key| !matches(key));
        work.reads.forget_where(matches);

        let rows = self.entries.list_entries(&filter).await?;
        let purged = self.purge_rows(&rows, true, invalidate_delay, true).await?;

        debug!(
            key_name,
            site_id,
            bundle_id,
            matched = rows.len(),
            purged,
            discarded,
            "Cache entries deleted"
        );
        Ok(purged)
    }

    /// Bulk delete by bundle, session scope and key-name pattern.
    ///
    /// Without a pattern or delay, when the selection covers every mirrored entry of
    /// the site, the site mirror is removed in one pass instead of file by file.
    pub async fn delete_matching(
        &self,
        work: &mut WorkUnit,
        bundle_id: Option<BundleId>,
        scope: Option<&SessionScope>,
        site_id: SiteId,
        pattern: Option<&str>,
        invalidate_delay: i64,
    ) -> Result<u64, CacheError> {
        let regex = pattern
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| CacheError::invalid_pattern(pattern, err))
            })
            .transpose()?;
        let session = SessionFilter::from_scope(scope);

        let filter = EntryFilter::for_site(site_id)
            .bundle(bundle_id)
            .session(session.clone())
            .key_pattern(pattern.map(str::to_string));
        let rows = self.entries.list_entries(&filter).await?;

        let covers_static = match bundle_id {
            None => true,
            Some(id) => self.bundles.is_static(id).await?,
        };
        let bulk_mirror = regex.is_none()
            && invalidate_delay == 0
            && self.mirror.is_enabled()
            && covers_static
            && session == SessionFilter::Any;

        let purged = if bulk_mirror {
            if let Err(err) = self.mirror.delete_all(site_id).await {
                self.mirror_failed("delete_all", "", site_id, &err);
            }
            self.purge_rows(&rows, false, 0, true).await?
        } else {
            self.purge_rows(&rows, true, invalidate_delay, true).await?
        };

        let discarded = work.queue.discard_where(|key| {
            key.site_id() == site_id
                && bundle_id.is_none_or(|bundle| bundle == key.bundle_id())
                && session.matches(key.session_id())
                && regex.as_ref().is_none_or(|regex| regex.is_match(key.key_name()))
        });
        work.reads.clear();

        info!(
            site_id,
            bundle_id,
            scope = scope.map(SessionScope::as_str),
            pattern,
            invalidate_delay,
            matched = rows.len(),
            purged,
            discarded,
            bulk_mirror,
            "Cache entries deleted in bulk"
        );
        Ok(purged)
    }

    /// Remove `rows`, or schedule them to expire across `invalidate_delay` seconds.
    ///
    /// Hard deletes emit `on_delete` per row and remove the row's mirror file when
    /// `clear_static` is set. Soft deletes leave both to the prune pass that later
    /// removes the rows.
    pub async fn purge(
        &self,
        rows: &[CacheEntryRecord],
        clear_static: bool,
        invalidate_delay: i64,
    ) -> Result<u64, CacheError> {
        self.purge_rows(rows, clear_static, invalidate_delay, true).await
    }

    async fn purge_rows(
        &self,
        rows: &[CacheEntryRecord],
        clear_static: bool,
        invalidate_delay: i64,
        notify: bool,
    ) -> Result<u64, CacheError> {
        if rows.is_empty() {
            return Ok(0);
        }

        if invalidate_delay > 0 {
            return Ok(self.invalidator.soft_delete(rows, invalidate_delay).await?);
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let deleted = self.writes.delete_entries(&ids).await?;

        for row in rows {
            if clear_static && self.is_mirrored(row.bundle_id).await? {
                let uri = uri_of(&row.key_name);
                if let Err(err) = self.mirror.delete(uri, row.site_id).await {
                    self.mirror_failed("delete", &row.key_name, row.site_id, &err);
                }
            }
            if notify {
                self.hooks.on_delete(&DeletedEntry::from(row));
            }
        }

        Ok(deleted)
    }

    /// Hard-delete every row with a past, non-zero expiry.
    pub async fn prune(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let expired = self.entries.list_expired(now).await?;
        if expired.is_empty() {
            debug!(now, "Nothing to prune");
            return Ok(0);
        }

        self.hooks.on_prune(&expired);
        let pruned = self.purge_rows(&expired, true, 0, false).await?;

        counter!(METRIC_PRUNED).increment(pruned);
        info!(now, expired = expired.len(), pruned, "Expired cache entries pruned");
        Ok(pruned)
    }

    /// Write everything queued in `work` and empty its queue.
    ///
    /// Inserts go out first as one batch that skips addresses already present, then
    /// updates apply in the order their keys were first queued. Mirror files are written
    /// before their rows; in index-only mode a row keeps its value unless its file was
    /// written. Writes drained before a store failure are not requeued.
    pub async fn flush(&self, work: &mut WorkUnit) -> Result<FlushSummary, CacheError> {
        let drained = work.queue.drain();
        if drained.is_empty() {
            return Ok(FlushSummary::default());
        }

        let started_at = Instant::now();
        let mut summary = FlushSummary::default();
        let index_only = self.mirror.is_index_only();

        let mut persisted = Vec::with_capacity(drained.inserts.len());
        for (key, record) in &drained.inserts {
            let mut record = record.clone();
            if self.is_mirrored(key.bundle_id()).await?
                && self.mirror_write(key, &record.parameters).await
            {
                summary.mirrored += 1;
                if index_only {
                    record.parameters.clear();
                }
            }
            persisted.push(record);
        }

        if !persisted.is_empty() {
            summary.inserted = self.writes.insert_entries(&persisted).await?;
        }

        for (key, update) in &drained.updates {
            let mut update = update.clone();
            let value = update.parameters.clone();
            if let Some(value) = value.as_deref()
                && self.is_mirrored(key.bundle_id()).await?
                && self.mirror_write(key, value).await
            {
                summary.mirrored += 1;
                if index_only {
                    update.parameters = Some(String::new());
                }
            }

            summary.updated += self.writes.update_entry(&update).await?;
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_FLUSH_MS).record(elapsed_ms);
        info!(
            queued_inserts = drained.inserts.len(),
            queued_updates = drained.updates.len(),
            inserted = summary.inserted,
            updated = summary.updated,
            mirrored = summary.mirrored,
            elapsed_ms,
            "Cache writes flushed"
        );

        Ok(summary)
    }

    /// Remove every entry and mirror file of the site.
    pub async fn flush_cache(&self, work: &mut WorkUnit, site_id: SiteId) -> Result<u64, CacheError> {
        let rows = self.entries.list_entries(&EntryFilter::for_site(site_id)).await?;
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let deleted = if ids.is_empty() {
            0
        } else {
            self.writes.delete_entries(&ids).await?
        };

        if self.mirror.is_enabled()
            && let Err(err) = self.mirror.delete_all(site_id).await
        {
            self.mirror_failed("delete_all", "", site_id, &err);
        }

        work.queue.discard_where(|key| key.site_id() == site_id);
        work.inserted.retain(|key| key.site_id() != site_id);
        work.reads.clear();

        self.hooks.on_flush_cache(site_id);
        info!(site_id, deleted, "Site cache flushed");
        Ok(deleted)
    }

    /// Whether the bundle has any entry on the site. Always reads the store.
    pub async fn bundle_entry_exists(
        &self,
        bundle_id: BundleId,
        site_id: SiteId,
    ) -> Result<bool, CacheError> {
        Ok(self.bundle_entry_count(bundle_id, site_id).await? > 0)
    }

    pub async fn bundle_entry_count(
        &self,
        bundle_id: BundleId,
        site_id: SiteId,
    ) -> Result<u64, CacheError> {
        Ok(self.entries.count_entries(bundle_id, site_id).await?)
    }

    async fn is_mirrored(&self, bundle_id: BundleId) -> Result<bool, CacheError> {
        Ok(self.mirror.is_enabled() && self.bundles.is_static(bundle_id).await?)
    }

    async fn mirror_write(&self, key: &CacheKey, value: &str) -> bool {
        match self.mirror.write(key.uri(), key.site_id(), value).await {
            Ok(path) => {
                debug!(key = %key, path = %path.display(), "Mirror file written");
                true
            }
            Err(err) => {
                self.mirror_failed("write", key.key_name(), key.site_id(), &err);
                false
            }
        }
    }

    fn mirror_failed(&self, op: &'static str, key_name: &str, site_id: SiteId, err: &MirrorError) {
        counter!(METRIC_MIRROR_FAILURE, "op" => op).increment(1);
        warn!(
            op,
            key_name,
            site_id,
            error = %err,
            "Static mirror operation failed"
        );
    }
}
