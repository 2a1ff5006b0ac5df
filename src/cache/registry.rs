//! Bundle registry.
//!
//! Resolves bundle names to ids and back. Bundles are reference data that never
//! change once created, so every resolution is memoized for the life of the
//! registry and the three default bundles are known without a store round-trip.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::application::repos::{BundlesRepo, RepoError};
use crate::domain::types::{BundleId, DEFAULT_BUNDLES, STATIC_BUNDLE_NAME};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

pub struct BundleRegistry {
    repo: Arc<dyn BundlesRepo>,
    by_name: RwLock<HashMap<String, BundleId>>,
    by_id: RwLock<HashMap<BundleId, String>>,
}

impl BundleRegistry {
    /// Create a registry pre-seeded with the default bundles.
    pub fn new(repo: Arc<dyn BundlesRepo>) -> Self {
        let registry = Self {
            repo,
            by_name: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
        };
        for (id, name, _) in DEFAULT_BUNDLES {
            registry.remember(id, name);
        }
        registry
    }

    /// Resolve a bundle id by name.
    pub async fn by_name(&self, name: &str) -> Result<Option<BundleId>, RepoError> {
        let cached = rw_read(&self.by_name, SOURCE, "by_name").get(name).copied();
        if cached.is_some() {
            return Ok(cached);
        }

        let found = self.repo.find_bundle_by_name(name).await?;
        Ok(found.map(|bundle| {
            self.remember(bundle.id, &bundle.name);
            bundle.id
        }))
    }

    /// Resolve a bundle name by id.
    pub async fn by_id(&self, id: BundleId) -> Result<Option<String>, RepoError> {
        let cached = rw_read(&self.by_id, SOURCE, "by_id").get(&id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let found = self.repo.find_bundle_by_id(id).await?;
        Ok(found.map(|bundle| {
            self.remember(bundle.id, &bundle.name);
            bundle.name
        }))
    }

    /// Create a bundle, returning the id of an existing bundle with the same name.
    pub async fn create(&self, name: &str, label: &str) -> Result<BundleId, RepoError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepoError::invalid_input("bundle name must not be empty"));
        }
        if let Some(id) = self.by_name(name).await? {
            return Ok(id);
        }

        let bundle = self.repo.create_bundle(name, label).await?;
        debug!(bundle_id = bundle.id, bundle_name = %bundle.name, "Bundle created");
        self.remember(bundle.id, &bundle.name);
        Ok(bundle.id)
    }

    /// Whether `id` names the `static` bundle.
    pub async fn is_static(&self, id: BundleId) -> Result<bool, RepoError> {
        Ok(self.by_id(id).await?.as_deref() == Some(STATIC_BUNDLE_NAME))
    }

    /// Number of memoized bundles.
    pub fn known(&self) -> usize {
        rw_read(&self.by_id, SOURCE, "known").len()
    }

    fn remember(&self, id: BundleId, name: &str) {
        rw_write(&self.by_name, SOURCE, "remember.by_name").insert(name.to_string(), id);
        rw_write(&self.by_id, SOURCE, "remember.by_id").insert(id, name.to_string());
    }
}
