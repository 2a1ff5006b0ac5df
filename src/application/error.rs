use std::error::Error as StdError;

use thiserror::Error;

use crate::{cache::CacheError, infra::error::InfraError};

/// Flattened error chain for log output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status used by the operator binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 2,
            AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Infra(InfraError::Database { .. } | InfraError::Migration { .. })
            | AppError::Cache(CacheError::Store(_)) => 69,
            _ => 1,
        }
    }
}
