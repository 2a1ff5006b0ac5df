//! Postgres-backed repository implementations.

mod bundles;
mod entries;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    query,
    postgres::{PgPool, PgPoolOptions},
};

/// Table holding cache entries.
pub(crate) const ENTRIES_TABLE: &str = "stash";
/// Table holding bundle definitions.
pub(crate) const BUNDLES_TABLE: &str = "stash_bundles";

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
