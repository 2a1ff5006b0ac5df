//! Shared enumerations and well-known identifiers for cache addressing.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub type BundleId = i64;
pub type SiteId = i64;

/// Session value that marks an entry as explicitly site-wide.
pub const GLOBAL_SESSION: &str = "_global";

pub const DEFAULT_BUNDLE_ID: BundleId = 1;
pub const TEMPLATE_BUNDLE_ID: BundleId = 2;
pub const STATIC_BUNDLE_ID: BundleId = 3;

pub const STATIC_BUNDLE_NAME: &str = "static";

/// Bundles seeded by the initial migration, as `(id, name, label)`.
pub const DEFAULT_BUNDLES: [(BundleId, &str, &str); 3] = [
    (DEFAULT_BUNDLE_ID, "default", "Default"),
    (TEMPLATE_BUNDLE_ID, "template", "Template"),
    (STATIC_BUNDLE_ID, STATIC_BUNDLE_NAME, "Static"),
];

/// How a stored `session_id` value scopes an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// No session value (absent or empty).
    Unscoped,
    /// The `_global` marker.
    Global,
    /// A specific session or user.
    Scoped,
}

impl SessionKind {
    pub fn of(session_id: Option<&str>) -> Self {
        match session_id {
            None | Some("") => SessionKind::Unscoped,
            Some(GLOBAL_SESSION) => SessionKind::Global,
            Some(_) => SessionKind::Scoped,
        }
    }
}

/// Session selector accepted by bulk deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// Every row carrying a session value other than `_global`.
    User,
    /// Only rows stored under `_global`.
    Site,
    /// No session filter.
    All,
    /// Exactly this session id.
    Session(String),
}

impl SessionScope {
    pub fn as_str(&self) -> &str {
        match self {
            SessionScope::User => "user",
            SessionScope::Site => "site",
            SessionScope::All => "all",
            SessionScope::Session(id) => id.as_str(),
        }
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed {
            "" => Err("session scope must not be empty".to_string()),
            "user" => Ok(SessionScope::User),
            "site" => Ok(SessionScope::Site),
            "all" => Ok(SessionScope::All),
            other => Ok(SessionScope::Session(other.to_string())),
        }
    }
}

/// Column selector for single-entry reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryColumn {
    #[default]
    Parameters,
    KeyLabel,
    Created,
    Expire,
}
