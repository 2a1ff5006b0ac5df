use async_trait::async_trait;

use crate::{
    application::repos::{BundlesRepo, RepoError},
    domain::entities::BundleRecord,
    domain::types::BundleId,
};

use super::{BUNDLES_TABLE, PostgresRepositories, util::map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BundleRow {
    id: i64,
    bundle_name: String,
    bundle_label: String,
}

impl From<BundleRow> for BundleRecord {
    fn from(row: BundleRow) -> Self {
        Self {
            id: row.id,
            name: row.bundle_name,
            label: row.bundle_label,
        }
    }
}

#[async_trait]
impl BundlesRepo for PostgresRepositories {
    async fn find_bundle_by_name(&self, name: &str) -> Result<Option<BundleRecord>, RepoError> {
        let sql = format!(
            "SELECT id, bundle_name, bundle_label FROM {BUNDLES_TABLE} WHERE bundle_name = $1"
        );
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(BundleRecord::from))
    }

    async fn find_bundle_by_id(&self, id: BundleId) -> Result<Option<BundleRecord>, RepoError> {
        let sql =
            format!("SELECT id, bundle_name, bundle_label FROM {BUNDLES_TABLE} WHERE id = $1");
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(BundleRecord::from))
    }

    async fn create_bundle(&self, name: &str, label: &str) -> Result<BundleRecord, RepoError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let sql = format!(
            "INSERT INTO {BUNDLES_TABLE} (bundle_name, bundle_label) VALUES ($1, $2) \
             ON CONFLICT (bundle_name) DO UPDATE SET bundle_name = EXCLUDED.bundle_name \
             RETURNING id, bundle_name, bundle_label"
        );
        let row = sqlx::query_as::<_, BundleRow>(&sql)
            .bind(name)
            .bind(label)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(BundleRecord::from(row))
    }
}
