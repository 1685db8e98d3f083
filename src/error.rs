//! Error types for the observable cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache and its HTTP host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Mutation or removal targeted an absent key
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Add targeted a key that is already present
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The replacement factory failed while resolving an expiration
    #[error("Expiration factory failed for {key}: {reason}")]
    FactoryFailure { key: String, reason: String },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Builds a `KeyNotFound` from any debuggable key.
    pub fn key_not_found(key: &impl std::fmt::Debug) -> Self {
        CacheError::KeyNotFound(format!("{:?}", key))
    }

    /// Builds a `DuplicateKey` from any debuggable key.
    pub fn duplicate_key(key: &impl std::fmt::Debug) -> Self {
        CacheError::DuplicateKey(format!("{:?}", key))
    }

    /// Builds a `FactoryFailure`, keeping the whole error chain in the reason.
    pub fn factory_failure(key: &impl std::fmt::Debug, error: &anyhow::Error) -> Self {
        CacheError::FactoryFailure {
            key: format!("{:?}", key),
            reason: format!("{:#}", error),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::DuplicateKey(_) => StatusCode::CONFLICT,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::FactoryFailure { .. } | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
