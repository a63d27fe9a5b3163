//! # Error Handling Module
//!
//! This module defines every failure the response cache can produce, using the
//! `thiserror` crate for the `Display`/`Error` boilerplate.
//!
//! ## How cache errors travel
//!
//! Cache failures are reported to the immediate caller of a cache operation
//! (`ApiCache::get_cache`, `ApiCache::set_cache`, ...) as `Err(CacheError)`.
//! The HTTP middleware is the only place that swallows them: it logs the error
//! and carries on as if the cache were empty, so a degraded store never changes
//! what the client receives.
//!
//! A rate-limit denial is *not* an error on the normal write path - it comes
//! back as [`CacheWrite::RateLimited`](crate::caching::CacheWrite). The
//! [`CacheError::RateLimited`] variant exists for callers who prefer to treat
//! it as one (see `CacheWrite::into_result`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type used throughout the cache
pub type CacheResult<T> = Result<T, CacheError>;

/// Failures of the caching engine and its collaborators
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    /// The key-value store could not be reached, or an operation timed out
    #[error("Cache store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A payload could not be turned into its stored text form
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A stored value could not be reversed through the codec pipeline
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Cache population for this key is over its write budget
    #[error("Cache write rate limit exceeded for key: {key}")]
    RateLimited { key: String },

    /// Invalid configuration (bad env values, failed validation, unreadable files)
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl CacheError {
    /// Create a store-unavailable error
    pub fn store_unavailable<S: Into<String>>(message: S) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status used when the error surfaces through an admin endpoint
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration { .. } => StatusCode::BAD_REQUEST,
            Self::Serialization { .. } | Self::Decode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::Serialization { .. } => "serialization_error",
            Self::Decode { .. } => "decode_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::Configuration { .. } => "configuration_error",
        }
    }

    /// Transient failures worth retrying later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::RateLimited { .. })
    }
}

/// Every Redis failure (connection refused, broken pipe, protocol error) means
/// the store is unavailable from the cache's point of view.
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::StoreUnavailable {
            message: "operation timed out".to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Decode {
            message: format!("invalid base64: {}", err),
        }
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Lets admin handlers return `CacheResult<Json<_>>` directly
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
