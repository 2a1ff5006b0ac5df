//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{BundleRecord, CacheEntryRecord};
use crate::domain::types::{BundleId, GLOBAL_SESSION, SessionScope, SiteId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Session predicate applied to entry queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionFilter {
    #[default]
    Any,
    Exact(String),
    /// Non-empty session values other than `_global`.
    NonGlobal,
    /// Exactly `_global`.
    Global,
}

impl SessionFilter {
    /// Resolve the bulk-deletion scope keyword into a predicate.
    pub fn from_scope(scope: Option<&SessionScope>) -> Self {
        match scope {
            None | Some(SessionScope::All) => SessionFilter::Any,
            Some(SessionScope::User) => SessionFilter::NonGlobal,
            Some(SessionScope::Site) => SessionFilter::Global,
            Some(SessionScope::Session(id)) => SessionFilter::Exact(id.clone()),
        }
    }

    pub fn matches(&self, session_id: Option<&str>) -> bool {
        match self {
            SessionFilter::Any => true,
            SessionFilter::Exact(expected) => session_id == Some(expected.as_str()),
            SessionFilter::NonGlobal => {
                matches!(session_id, Some(value) if !value.is_empty() && value != GLOBAL_SESSION)
            }
            SessionFilter::Global => session_id == Some(GLOBAL_SESSION),
        }
    }
}

/// Equality predicates plus an optional key-name regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    pub site_id: SiteId,
    pub key_name: Option<String>,
    pub bundle_id: Option<BundleId>,
    pub session: SessionFilter,
    pub key_pattern: Option<String>,
    pub limit: Option<u32>,
}

impl EntryFilter {
    pub fn for_site(site_id: SiteId) -> Self {
        Self {
            site_id,
            key_name: None,
            bundle_id: None,
            session: SessionFilter::Any,
            key_pattern: None,
            limit: None,
        }
    }

    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    pub fn bundle(mut self, bundle_id: Option<BundleId>) -> Self {
        self.bundle_id = bundle_id;
        self
    }

    pub fn session(mut self, session: SessionFilter) -> Self {
        self.session = session;
        self
    }

    pub fn key_pattern(mut self, pattern: Option<String>) -> Self {
        self.key_pattern = pattern;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCacheEntry {
    pub key_name: String,
    pub bundle_id: BundleId,
    pub session_id: Option<String>,
    pub site_id: SiteId,
    pub created: i64,
    pub expire: i64,
    pub parameters: String,
    pub key_label: String,
}

/// Equality-matched update on `(key_name, bundle_id, site_id[, session_id])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub key_name: String,
    pub bundle_id: BundleId,
    pub session_id: Option<String>,
    pub site_id: SiteId,
    pub expire: i64,
    /// `None` keeps the stored value.
    pub parameters: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryChange {
    pub id: i64,
    pub expire: i64,
}

#[async_trait]
pub trait EntriesRepo: Send + Sync {
    /// First matching row by id, ignoring any limit on the filter.
    async fn find_entry(&self, filter: &EntryFilter) -> Result<Option<CacheEntryRecord>, RepoError>;

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<CacheEntryRecord>, RepoError>;

    /// Rows with `expire != 0 AND expire < now`.
    async fn list_expired(&self, now: i64) -> Result<Vec<CacheEntryRecord>, RepoError>;

    async fn count_entries(&self, bundle_id: BundleId, site_id: SiteId) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait EntriesWriteRepo: Send + Sync {
    /// Batched insert that silently skips rows whose address already exists.
    /// Returns the number of rows actually written.
    async fn insert_entries(&self, entries: &[NewCacheEntry]) -> Result<u64, RepoError>;

    async fn update_entry(&self, update: &EntryUpdate) -> Result<u64, RepoError>;

    async fn set_expiries(&self, changes: &[ExpiryChange]) -> Result<u64, RepoError>;

    async fn delete_entries(&self, ids: &[i64]) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait BundlesRepo: Send + Sync {
    async fn find_bundle_by_name(&self, name: &str) -> Result<Option<BundleRecord>, RepoError>;

    async fn find_bundle_by_id(&self, id: BundleId) -> Result<Option<BundleRecord>, RepoError>;

    /// Create the bundle, or return the existing one with the same name.
    async fn create_bundle(&self, name: &str, label: &str) -> Result<BundleRecord, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keywords_map_to_session_filters() {
        assert_eq!(SessionFilter::from_scope(None), SessionFilter::Any);
        assert_eq!(
            SessionFilter::from_scope(Some(&SessionScope::All)),
            SessionFilter::Any
        );
        assert_eq!(
            SessionFilter::from_scope(Some(&SessionScope::User)),
            SessionFilter::NonGlobal
        );
        assert_eq!(
            SessionFilter::from_scope(Some(&SessionScope::Site)),
            SessionFilter::Global
        );
        assert_eq!(
            SessionFilter::from_scope(Some(&SessionScope::Session("abc".into()))),
            SessionFilter::Exact("abc".into())
        );
    }

    #[test]
    fn non_global_excludes_unscoped_and_global_rows() {
        let filter = SessionFilter::NonGlobal;
        assert!(filter.matches(Some("abc")));
        assert!(!filter.matches(Some(GLOBAL_SESSION)));
        assert!(!filter.matches(Some("")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn global_matches_only_marker() {
        let filter = SessionFilter::Global;
        assert!(filter.matches(Some(GLOBAL_SESSION)));
        assert!(!filter.matches(Some("abc")));
        assert!(!filter.matches(None));
    }
}
