use thiserror::Error;

use crate::application::repos::RepoError;

use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("insert for `{key}` is already queued in this unit of work")]
    AlreadyQueued { key: CacheKey },
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error("invalid key pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("unknown bundle `{name}`")]
    UnknownBundle { name: String },
}

impl CacheError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }
}
