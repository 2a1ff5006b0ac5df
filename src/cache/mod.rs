//! Stash cache engine
//!
//! Scoped, TTL-governed key/value caching over three layers:
//!
//! - **Unit memo**: per-request read cache and write queue ([`WorkUnit`])
//! - **Store**: persisted entries behind the repository traits
//! - **Mirror**: `static` bundle entries projected to files ([`StaticMirror`])
//!
//! ## Configuration
//!
//! Mirror behavior comes from the `[static_cache]` section of the settings file:
//!
//! ```toml
//! [static_cache]
//! enabled = true
//! index_only = false
//! basepath = "/var/www/static"
//! # ... see config.rs for all options
//! ```

mod clock;
mod config;
mod error;
mod hooks;
mod invalidator;
mod keys;
mod lock;
mod mirror;
mod queue;
mod reads;
mod registry;
mod store;
mod work;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::CacheConfig;
pub(crate) use config::{DEFAULT_READ_CACHE_LIMIT, DEFAULT_SITE_ID, DEFAULT_STATIC_BASEPATH};
pub use error::CacheError;
pub use hooks::{CacheHooks, DeletedEntry, HookEvent, RecordingHooks, TracingHooks};
pub use invalidator::{StampedeInvalidator, spread_expiries};
pub use keys::{CacheKey, URI_DELIMITER, uri_of};
pub use mirror::{
    DEFAULT_CHARACTER_BLACKLIST, INDEX_FILE, INDEX_PLACEHOLDER, MirrorError, StaticMirror,
};
pub use queue::{DrainedWrites, WriteQueue};
pub use reads::{CachedRead, ReadCache};
pub use registry::BundleRegistry;
pub use store::{CacheStore, FlushSummary};
pub use work::WorkUnit;

pub(crate) use lock::mutex_lock;
