use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{
        EntriesRepo, EntriesWriteRepo, EntryFilter, EntryUpdate, ExpiryChange, NewCacheEntry,
        RepoError, SessionFilter,
    },
    domain::entities::CacheEntryRecord,
    domain::types::{BundleId, GLOBAL_SESSION, SiteId},
};

use super::{
    ENTRIES_TABLE, PostgresRepositories,
    util::{convert_count, convert_limit, map_sqlx_error},
};

const ENTRY_COLUMNS: &str =
    "id, key_name, bundle_id, session_id, site_id, created, expire, parameters, key_label";

/// Rows per batched insert; eight binds each keeps a batch well under the protocol limit.
const INSERT_CHUNK: usize = 1000;

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    key_name: String,
    bundle_id: i64,
    session_id: Option<String>,
    site_id: i64,
    created: i64,
    expire: i64,
    parameters: String,
    key_label: String,
}

impl From<EntryRow> for CacheEntryRecord {
    fn from(row: EntryRow) -> Self {
        Self {
            id: row.id,
            key_name: row.key_name,
            bundle_id: row.bundle_id,
            session_id: row.session_id,
            site_id: row.site_id,
            created: row.created,
            expire: row.expire,
            parameters: row.parameters,
            key_label: row.key_label,
        }
    }
}

impl PostgresRepositories {
    fn select_entries<'q>(filter: &'q EntryFilter, limit: Option<u32>) -> QueryBuilder<'q, Postgres> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM {ENTRIES_TABLE} WHERE site_id = "
        ));
        qb.push_bind(filter.site_id);

        if let Some(key_name) = filter.key_name.as_ref() {
            qb.push(" AND key_name = ");
            qb.push_bind(key_name);
        }
        if let Some(bundle_id) = filter.bundle_id {
            qb.push(" AND bundle_id = ");
            qb.push_bind(bundle_id);
        }
        Self::apply_session_filter(&mut qb, &filter.session);
        if let Some(pattern) = filter.key_pattern.as_ref() {
            qb.push(" AND key_name ~ ");
            qb.push_bind(pattern);
        }

        qb.push(" ORDER BY id");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(convert_limit(limit));
        }
        qb
    }

    fn apply_session_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, session: &'q SessionFilter) {
        match session {
            SessionFilter::Any => {}
            SessionFilter::Exact(session_id) => {
                qb.push(" AND session_id = ");
                qb.push_bind(session_id);
            }
            SessionFilter::NonGlobal => {
                qb.push(" AND session_id IS NOT NULL AND session_id <> '' AND session_id <> ");
                qb.push_bind(GLOBAL_SESSION);
            }
            SessionFilter::Global => {
                qb.push(" AND session_id = ");
                qb.push_bind(GLOBAL_SESSION);
            }
        }
    }

    fn insert_entries_query(entries: &[NewCacheEntry]) -> QueryBuilder<'_, Postgres> {
        let mut qb = QueryBuilder::new(format!(
            "INSERT INTO {ENTRIES_TABLE} \
             (key_name, bundle_id, session_id, site_id, created, expire, parameters, key_label) "
        ));
        qb.push_values(entries, |mut row, entry| {
            row.push_bind(&entry.key_name)
                .push_bind(entry.bundle_id)
                .push_bind(entry.session_id.as_deref())
                .push_bind(entry.site_id)
                .push_bind(entry.created)
                .push_bind(entry.expire)
                .push_bind(&entry.parameters)
                .push_bind(&entry.key_label);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        qb
    }

    fn update_entry_query(update: &EntryUpdate) -> QueryBuilder<'_, Postgres> {
        let mut qb = QueryBuilder::new(format!("UPDATE {ENTRIES_TABLE} SET expire = "));
        qb.push_bind(update.expire);
        if let Some(parameters) = update.parameters.as_ref() {
            qb.push(", parameters = ");
            qb.push_bind(parameters);
        }
        qb.push(" WHERE key_name = ");
        qb.push_bind(&update.key_name);
        qb.push(" AND bundle_id = ");
        qb.push_bind(update.bundle_id);
        qb.push(" AND site_id = ");
        qb.push_bind(update.site_id);
        if let Some(session_id) = update.session_id.as_ref() {
            qb.push(" AND session_id = ");
            qb.push_bind(session_id);
        }
        qb
    }
}

#[async_trait]
impl EntriesRepo for PostgresRepositories {
    async fn find_entry(&self, filter: &EntryFilter) -> Result<Option<CacheEntryRecord>, RepoError> {
        let row = Self::select_entries(filter, Some(1))
            .build_query_as::<EntryRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(CacheEntryRecord::from))
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let rows = Self::select_entries(filter, filter.limit)
            .build_query_as::<EntryRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CacheEntryRecord::from).collect())
    }

    async fn list_expired(&self, now: i64) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {ENTRIES_TABLE} \
             WHERE expire <> 0 AND expire < $1 \
             ORDER BY id"
        );
        let rows = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(now)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CacheEntryRecord::from).collect())
    }

    async fn count_entries(&self, bundle_id: BundleId, site_id: SiteId) -> Result<u64, RepoError> {
        let sql = format!("SELECT COUNT(*) FROM {ENTRIES_TABLE} WHERE bundle_id = $1 AND site_id = $2");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(bundle_id)
            .bind(site_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        convert_count(count)
    }
}

#[async_trait]
impl EntriesWriteRepo for PostgresRepositories {
    async fn insert_entries(&self, entries: &[NewCacheEntry]) -> Result<u64, RepoError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let mut inserted = 0;
        for chunk in entries.chunks(INSERT_CHUNK) {
            let result = Self::insert_entries_query(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(inserted)
    }

    async fn update_entry(&self, update: &EntryUpdate) -> Result<u64, RepoError> {
        let result = Self::update_entry_query(update)
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn set_expiries(&self, changes: &[ExpiryChange]) -> Result<u64, RepoError> {
        if changes.is_empty() {
            return Ok(0);
        }

        let (ids, expiries): (Vec<i64>, Vec<i64>) =
            changes.iter().map(|change| (change.id, change.expire)).unzip();
        let sql = format!(
            "UPDATE {ENTRIES_TABLE} AS s SET expire = v.expire \
             FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS v(id, expire) \
             WHERE s.id = v.id"
        );
        let result = sqlx::query(&sql)
            .bind(ids)
            .bind(expiries)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_entries(&self, ids: &[i64]) -> Result<u64, RepoError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!("DELETE FROM {ENTRIES_TABLE} WHERE id = ANY($1)");
        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_binds_every_equality_predicate() {
        let filter = EntryFilter::for_site(1)
            .key_name("nav")
            .bundle(Some(2))
            .session(SessionFilter::Exact("abc".into()));
        let qb = PostgresRepositories::select_entries(&filter, Some(1));
        assert_eq!(
            qb.sql(),
            "SELECT id, key_name, bundle_id, session_id, site_id, created, expire, parameters, key_label \
             FROM stash WHERE site_id = $1 AND key_name = $2 AND bundle_id = $3 AND session_id = $4 \
             ORDER BY id LIMIT $5"
        );
    }

    #[test]
    fn user_scope_excludes_unscoped_and_global_rows() {
        let filter = EntryFilter::for_site(1)
            .session(SessionFilter::NonGlobal)
            .key_pattern(Some("^blog/".into()));
        let qb = PostgresRepositories::select_entries(&filter, None);
        assert!(qb.sql().ends_with(
            "WHERE site_id = $1 AND session_id IS NOT NULL AND session_id <> '' \
             AND session_id <> $2 AND key_name ~ $3 ORDER BY id"
        ));
    }

    #[test]
    fn value_less_update_only_touches_expiry() {
        let update = EntryUpdate {
            key_name: "nav".into(),
            bundle_id: 1,
            session_id: None,
            site_id: 1,
            expire: 10,
            parameters: None,
        };
        let qb = PostgresRepositories::update_entry_query(&update);
        assert_eq!(
            qb.sql(),
            "UPDATE stash SET expire = $1 WHERE key_name = $2 AND bundle_id = $3 AND site_id = $4"
        );
    }

    #[test]
    fn batched_insert_ignores_existing_addresses() {
        let entry = NewCacheEntry {
            key_name: "nav".into(),
            bundle_id: 1,
            session_id: None,
            site_id: 1,
            created: 1,
            expire: 0,
            parameters: "v".into(),
            key_label: String::new(),
        };
        let entries = vec![entry.clone(), entry];
        let qb = PostgresRepositories::insert_entries_query(&entries);
        assert!(qb.sql().contains("VALUES ($1, $2, $3, $4, $5, $6, $7, $8), ($9,"));
        assert!(qb.sql().ends_with(" ON CONFLICT DO NOTHING"));
    }
}
