//! Static file mirror.
//!
//! Entries in the `static` bundle are projected to
//! `{base}/{site_id}/{uri}/index.html` so a web server can deliver them without
//! touching the application. The mirror is an optimization only: every failure is
//! reported to the caller, who logs it and carries on.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::domain::types::SiteId;

use super::config::CacheConfig;

pub const INDEX_FILE: &str = "index.html";

/// URI that maps to the site root.
pub const INDEX_PLACEHOLDER: &str = "[index]";

/// Template delimiters plus characters unsafe in paths.
pub const DEFAULT_CHARACTER_BLACKLIST: &str = "{}<>:\"\\|*.";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("static caching is disabled")]
    Disabled,
    #[error("uri `{uri}` contains characters that are not allowed in the static mirror")]
    UnsafePath { uri: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StaticMirror {
    enabled: bool,
    index_only: bool,
    base: PathBuf,
    blacklist: Vec<char>,
}

impl StaticMirror {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.static_cache_enabled,
            index_only: config.static_cache_index,
            base: config.static_basepath.clone(),
            blacklist: config.static_character_blacklist.chars().collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether persisted rows for mirrored entries carry an empty value.
    pub fn is_index_only(&self) -> bool {
        self.enabled && self.index_only
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding the site's mirror.
    pub fn site_root(&self, site_id: SiteId) -> PathBuf {
        self.base.join(site_id.to_string())
    }

    /// Absolute path of the index file for `uri`.
    ///
    /// Fails closed when the uri contains a blacklisted character or any component
    /// that is not a plain name.
    pub fn resolve(&self, uri: &str, site_id: SiteId) -> Result<PathBuf, MirrorError> {
        let trimmed = uri.trim_matches('/');
        let relative = if trimmed == INDEX_PLACEHOLDER {
            ""
        } else {
            trimmed
        };

        let unsafe_path = || MirrorError::UnsafePath {
            uri: uri.to_string(),
        };

        if relative.chars().any(|c| self.blacklist.contains(&c)) {
            return Err(unsafe_path());
        }

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(unsafe_path());
        }

        Ok(self.site_root(site_id).join(relative).join(INDEX_FILE))
    }

    /// Write `value` to the index file for `uri`, replacing earlier content.
    pub async fn write(&self, uri: &str, site_id: SiteId, value: &str) -> Result<PathBuf, MirrorError> {
        self.ensure_enabled()?;
        let path = self.resolve(uri, site_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, value).await?;
        Ok(path)
    }

    pub async fn read(&self, uri: &str, site_id: SiteId) -> Result<String, MirrorError> {
        self.ensure_enabled()?;
        let path = self.resolve(uri, site_id)?;
        Ok(fs::read_to_string(path).await?)
    }

    /// Remove the index file for `uri`. Returns `false` when it did not exist.
    pub async fn delete(&self, uri: &str, site_id: SiteId) -> Result<bool, MirrorError> {
        self.ensure_enabled()?;
        let path = self.resolve(uri, site_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MirrorError::Io(err)),
        }
    }

    /// Recursively remove everything under the site's mirror root.
    pub async fn delete_all(&self, site_id: SiteId) -> Result<(), MirrorError> {
        self.ensure_enabled()?;
        match fs::remove_dir_all(self.site_root(site_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MirrorError::Io(err)),
        }
    }

    fn ensure_enabled(&self) -> Result<(), MirrorError> {
        if self.enabled {
            Ok(())
        } else {
            Err(MirrorError::Disabled)
        }
    }
}
