//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{CliArgs, Command, FlushArgs, GlobalOverrides, InvalidateArgs};

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    DEFAULT_CHARACTER_BLACKLIST, DEFAULT_READ_CACHE_LIMIT, DEFAULT_SITE_ID, DEFAULT_STATIC_BASEPATH,
};
use crate::domain::types::SiteId;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stash";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub static_cache: StaticCacheSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct StaticCacheSettings {
    pub enabled: bool,
    pub index_only: bool,
    pub basepath: PathBuf,
    pub character_blacklist: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub read_cache_limit: NonZeroUsize,
    pub default_site_id: SiteId,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STASH").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    static_cache: RawStaticCacheSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.static_cache_enabled {
            self.static_cache.enabled = Some(enabled);
        }
        if let Some(path) = overrides.static_basepath.as_ref() {
            self.static_cache.basepath = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            static_cache,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            static_cache: build_static_cache_settings(static_cache)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_static_cache_settings(
    static_cache: RawStaticCacheSettings,
) -> Result<StaticCacheSettings, LoadError> {
    let enabled = static_cache.enabled.unwrap_or(false);
    let basepath = static_cache
        .basepath
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_BASEPATH));
    if enabled && basepath.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "static_cache.basepath",
            "must not be empty when the static mirror is enabled",
        ));
    }

    let character_blacklist = static_cache
        .character_blacklist
        .unwrap_or_else(|| DEFAULT_CHARACTER_BLACKLIST.to_string());
    if character_blacklist.contains('/') {
        return Err(LoadError::invalid(
            "static_cache.character_blacklist",
            "`/` separates path segments and cannot be blacklisted",
        ));
    }

    Ok(StaticCacheSettings {
        enabled,
        index_only: static_cache.index_only.unwrap_or(false),
        basepath,
        character_blacklist,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let read_cache_limit = non_zero_usize(
        cache
            .read_cache_limit
            .unwrap_or(DEFAULT_READ_CACHE_LIMIT as u64),
        "cache.read_cache_limit",
    )?;

    let default_site_id = cache.default_site_id.unwrap_or(DEFAULT_SITE_ID);
    if default_site_id < 0 {
        return Err(LoadError::invalid(
            "cache.default_site_id",
            "must not be negative",
        ));
    }

    Ok(CacheSettings {
        read_cache_limit,
        default_site_id,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStaticCacheSettings {
    enabled: Option<bool>,
    index_only: Option<bool>,
    basepath: Option<PathBuf>,
    character_blacklist: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    read_cache_limit: Option<u64>,
    default_site_id: Option<SiteId>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
