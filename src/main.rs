use std::{process, sync::Arc};

use stash::{
    application::error::{AppError, ErrorReport},
    cache::{CacheConfig, CacheStore},
    config::{self, Command, FlushArgs, InvalidateArgs},
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use sqlx::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("stash", error);
    let log = || {
        error!(
            error = %error,
            chain = ?report.messages,
            source = report.source,
            "application error"
        );
    };

    if dispatcher::has_been_set() {
        log();
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, log);
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let pool = connect(&settings).await?;

    match cli_args.command {
        Command::Migrate => run_migrate(&pool).await,
        Command::Prune => run_prune(&build_store(&settings, pool)).await,
        Command::Flush(args) => run_flush(&build_store(&settings, pool), args).await,
        Command::Invalidate(args) => run_invalidate(&build_store(&settings, pool), args).await,
    }
}

async fn connect(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))
}

fn build_store(settings: &config::Settings, pool: PgPool) -> CacheStore {
    let repositories = Arc::new(PostgresRepositories::new(pool));
    CacheStore::new(CacheConfig::from(settings), repositories)
}

async fn run_migrate(pool: &PgPool) -> Result<(), AppError> {
    PostgresRepositories::run_migrations(pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!("Migrations applied");
    Ok(())
}

async fn run_prune(store: &CacheStore) -> Result<(), AppError> {
    let pruned = store.prune().await?;
    info!(pruned, "Prune complete");
    Ok(())
}

async fn run_flush(store: &CacheStore, args: FlushArgs) -> Result<(), AppError> {
    let site_id = args.site.unwrap_or(store.config().default_site_id);
    let mut work = store.begin();
    let deleted = store.flush_cache(&mut work, site_id).await?;
    store.flush(&mut work).await?;
    info!(site_id, deleted, "Flush complete");
    Ok(())
}

async fn run_invalidate(store: &CacheStore, args: InvalidateArgs) -> Result<(), AppError> {
    let site_id = args.site.unwrap_or(store.config().default_site_id);
    let bundle_id = match args.bundle.as_deref() {
        Some(name) => Some(store.bundle_id(name).await?),
        None => None,
    };

    let mut work = store.begin();
    let affected = store
        .delete_matching(
            &mut work,
            bundle_id,
            args.scope.as_ref(),
            site_id,
            args.pattern.as_deref(),
            i64::from(args.delay),
        )
        .await?;
    store.flush(&mut work).await?;

    info!(
        site_id,
        bundle_id,
        affected,
        delay = args.delay,
        "Invalidation complete"
    );
    Ok(())
}
