//! Domain entities mirrored from persistent storage.

use serde::Serialize;

use crate::domain::types::{BundleId, EntryColumn, SessionKind, SiteId};

/// One persisted cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryRecord {
    pub id: i64,
    pub key_name: String,
    pub bundle_id: BundleId,
    pub session_id: Option<String>,
    pub site_id: SiteId,
    pub created: i64,
    /// Unix seconds; `0` never expires.
    pub expire: i64,
    pub parameters: String,
    pub key_label: String,
}

impl CacheEntryRecord {
    pub fn never_expires(&self) -> bool {
        self.expire == 0
    }

    /// Whether a prune pass running at `now` removes this record.
    pub fn is_prunable_at(&self, now: i64) -> bool {
        self.expire != 0 && self.expire < now
    }

    pub fn session_kind(&self) -> SessionKind {
        SessionKind::of(self.session_id.as_deref())
    }

    pub fn column(&self, column: EntryColumn) -> String {
        match column {
            EntryColumn::Parameters => self.parameters.clone(),
            EntryColumn::KeyLabel => self.key_label.clone(),
            EntryColumn::Created => self.created.to_string(),
            EntryColumn::Expire => self.expire.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleRecord {
    pub id: BundleId,
    pub name: String,
    pub label: String,
}
