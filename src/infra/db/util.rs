use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("invalid regular expression")
                || db.message().contains("violates foreign key constraint")
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout")
                || db
                    .message()
                    .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}

/// Convert a Postgres `BIGINT` count into the unsigned count the traits expose.
pub(crate) fn convert_count(value: i64) -> Result<u64, RepoError> {
    value
        .try_into()
        .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
}

pub(crate) fn convert_limit(limit: u32) -> i64 {
    i64::from(limit)
}
