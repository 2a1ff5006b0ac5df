//! Cache key definitions.
//!
//! A [`CacheKey`] is the composite address `(key_name, bundle_id, site_id, session_id)`
//! every read and write uses. The store does not enforce it as a constraint; the
//! queue, the read cache and the equality predicates all agree on it.

use std::fmt;

use crate::domain::types::{BundleId, GLOBAL_SESSION, SessionKind, SiteId};

/// Separator between the URI prefix and the rest of a key name.
pub const URI_DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    key_name: String,
    bundle_id: BundleId,
    site_id: SiteId,
    session_id: Option<String>,
}

impl CacheKey {
    /// Unscoped key.
    ///
    /// Reads and updates through an unscoped key do not constrain the session column:
    /// a read returns the lowest-id row with this name in any session, and an update
    /// touches every session's row. Do not store one name both unscoped and scoped.
    pub fn new(key_name: impl Into<String>, bundle_id: BundleId, site_id: SiteId) -> Self {
        Self {
            key_name: key_name.into(),
            bundle_id,
            site_id,
            session_id: None,
        }
    }

    /// Scope the key to a session. Empty values leave it unscoped.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.session_id = (!session_id.is_empty()).then_some(session_id);
        self
    }

    /// Scope the key to the whole site.
    pub fn global(self) -> Self {
        self.with_session(GLOBAL_SESSION)
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn session_kind(&self) -> SessionKind {
        SessionKind::of(self.session_id())
    }

    /// URI portion used to place the entry in the static mirror.
    pub fn uri(&self) -> &str {
        uri_of(&self.key_name)
    }

    /// Match against a partially specified address. `None` matches anything.
    pub fn matches(
        &self,
        key_name: &str,
        site_id: SiteId,
        bundle_id: Option<BundleId>,
        session_id: Option<&str>,
    ) -> bool {
        self.key_name == key_name
            && self.site_id == site_id
            && bundle_id.is_none_or(|bundle| bundle == self.bundle_id)
            && session_id.is_none_or(|session| self.session_id() == Some(session))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}+{}+{}",
            self.key_name,
            self.bundle_id,
            self.site_id,
            self.session_id().unwrap_or_default()
        )
    }
}

/// Portion of `key_name` before the first `:`, or the whole name when there is none.
pub fn uri_of(key_name: &str) -> &str {
    key_name
        .split_once(URI_DELIMITER)
        .map_or(key_name, |(uri, _)| uri)
}
