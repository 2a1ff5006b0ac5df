//! Cache engine configuration.
//!
//! Controls the static mirror and the per-unit read cache. Built from the resolved
//! [`Settings`](crate::config::Settings), or from `Default` when embedding.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::domain::types::SiteId;

use super::mirror::DEFAULT_CHARACTER_BLACKLIST;

pub(crate) const DEFAULT_READ_CACHE_LIMIT: usize = 1000;
pub(crate) const DEFAULT_SITE_ID: SiteId = 1;
pub(crate) const DEFAULT_STATIC_BASEPATH: &str = "static";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Mirror `static` bundle entries to files.
    pub static_cache_enabled: bool,
    /// Keep mirrored payloads only on disk; persisted rows carry an empty value.
    pub static_cache_index: bool,
    /// Root directory of the mirror.
    pub static_basepath: PathBuf,
    /// Characters that make a mirror path unsafe.
    pub static_character_blacklist: String,
    /// Maximum memoized reads per unit of work.
    pub read_cache_limit: usize,
    /// Site used when callers do not name one.
    pub default_site_id: SiteId,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_cache_enabled: false,
            static_cache_index: false,
            static_basepath: PathBuf::from(DEFAULT_STATIC_BASEPATH),
            static_character_blacklist: DEFAULT_CHARACTER_BLACKLIST.to_string(),
            read_cache_limit: DEFAULT_READ_CACHE_LIMIT,
            default_site_id: DEFAULT_SITE_ID,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            static_cache_enabled: settings.static_cache.enabled,
            static_cache_index: settings.static_cache.index_only,
            static_basepath: settings.static_cache.basepath.clone(),
            static_character_blacklist: settings.static_cache.character_blacklist.clone(),
            read_cache_limit: settings.cache.read_cache_limit.get(),
            default_site_id: settings.cache.default_site_id,
        }
    }
}

impl CacheConfig {
    /// Returns the read cache limit as NonZeroUsize, clamping to 1 if zero.
    pub fn read_cache_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.read_cache_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
