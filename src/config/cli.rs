use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::{SessionScope, SiteId};

/// Command-line arguments for the stash binary.
#[derive(Debug, Parser)]
#[command(name = "stash", version, about = "Stash cache maintenance")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STASH_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Hard-delete every entry whose expiry has passed.
    Prune,
    /// Remove every entry and mirror file of one site.
    Flush(FlushArgs),
    /// Delete or soft-expire entries by bundle, session scope and key pattern.
    Invalidate(InvalidateArgs),
    /// Apply the bundled database migrations.
    Migrate,
}

#[derive(Debug, Args, Clone, Default)]
pub struct FlushArgs {
    /// Site to flush; defaults to `cache.default_site_id`.
    #[arg(long, value_name = "ID")]
    pub site: Option<SiteId>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct InvalidateArgs {
    /// Site to invalidate; defaults to `cache.default_site_id`.
    #[arg(long, value_name = "ID")]
    pub site: Option<SiteId>,

    /// Restrict to one bundle by name.
    #[arg(long, value_name = "NAME")]
    pub bundle: Option<String>,

    /// `user`, `site`, `all`, or a literal session id.
    #[arg(long, value_name = "SCOPE")]
    pub scope: Option<SessionScope>,

    /// Regular expression matched against key names.
    #[arg(long, value_name = "REGEX")]
    pub pattern: Option<String>,

    /// Spread expiry over this many seconds instead of deleting immediately.
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    pub delay: u32,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the log level filter.
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the static mirror.
    #[arg(
        long = "static-cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub static_cache_enabled: Option<bool>,

    /// Override the static mirror root directory.
    #[arg(
        long = "static-basepath",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub static_basepath: Option<PathBuf>,
}
