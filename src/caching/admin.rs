//! # Cache Admin Interface
//!
//! Admin endpoints for explicit invalidation and store health.

use crate::caching::api_cache::ApiCache;
use crate::caching::key_generator::RequestDescriptor;
use crate::core::config::CacheConfig;
use crate::core::error::{CacheError, CacheResult};
use axum::{
    extract::State,
    http::Method,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache admin state
#[derive(Clone)]
pub struct CacheAdminState {
    pub cache: Arc<ApiCache>,
}

/// Cache admin router
pub struct CacheAdminRouter;

impl CacheAdminRouter {
    /// Create cache admin router
    pub fn create_router(state: CacheAdminState) -> Router {
        Router::new()
            .route("/cache/invalidate", post(invalidate_cache))
            .route("/cache/health", get(get_cache_health))
            .route("/cache/config", get(get_cache_config))
            .with_state(state)
    }
}

/// Describes the request whose cached response should be dropped
#[derive(Debug, Clone, Deserialize)]
pub struct CacheInvalidationRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
}

fn default_method() -> String {
    Method::GET.to_string()
}

impl CacheInvalidationRequest {
    fn descriptor(&self) -> CacheResult<RequestDescriptor> {
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|e| CacheError::config(format!("Invalid method '{}': {}", self.method, e)))?;

        let query = self.query.as_ref().filter(|query| !query.is_empty()).cloned();
        Ok(RequestDescriptor::new(method, self.path.clone(), query))
    }
}

/// Cache invalidation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheInvalidationResponse {
    pub key: String,
    pub removed: bool,
}

/// Cache health response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheHealthResponse {
    pub healthy: bool,
}

/// Invalidate the entry for a request descriptor
pub async fn invalidate_cache(
    State(state): State<CacheAdminState>,
    Json(request): Json<CacheInvalidationRequest>,
) -> Result<Json<CacheInvalidationResponse>, CacheError> {
    let descriptor = request.descriptor()?;
    let key = state.cache.key_for(&descriptor);
    let removed = state.cache.invalidate(&descriptor).await?;

    info!(key = %key, removed, "Cache invalidation requested");

    Ok(Json(CacheInvalidationResponse { key, removed }))
}

/// Report whether the backing store answers
pub async fn get_cache_health(State(state): State<CacheAdminState>) -> Json<CacheHealthResponse> {
    let healthy = match state.cache.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(error = %e, "Cache health check failed");
            false
        }
    };

    Json(CacheHealthResponse { healthy })
}

/// Effective cache configuration
pub async fn get_cache_config(State(state): State<CacheAdminState>) -> Json<CacheConfig> {
    Json(state.cache.config().clone())
}
