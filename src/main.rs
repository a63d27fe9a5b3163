//! # API Cache - Demo Server
//!
//! Runs a small JSON API behind the response cache so the middleware can be
//! exercised end to end against a real Redis.
//!
//! Configuration comes from the YAML (or `.json`) file named by the first
//! argument or `APICACHE_CONFIG`. Without a file the defaults apply, with the
//! cache section taken from `APICACHE_PREFIX` / `APICACHE_EXPIRATION_SECONDS`.
//! `APICACHE_REDIS_URL`, `APICACHE_BIND_ADDRESS`, `APICACHE_LOG_LEVEL` and
//! `APICACHE_LOG_FORMAT` override either source.

use anyhow::Context;
use axum::{
    extract::Path,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use api_cache::caching::{ApiCache, CacheAdminRouter, CacheAdminState, CacheLayer, RedisStore};
use api_cache::core::config::AppConfig;
use api_cache::observability::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.logging)?;

    info!("🚀 Starting API Cache");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = RedisStore::connect(config.redis.clone())
        .await
        .with_context(|| format!("failed to connect to Redis at {}", config.redis.url))?;

    let cache = Arc::new(ApiCache::new(Arc::new(store), config.cache.clone())?);
    info!(
        prefix = %config.cache.prefix,
        expiration = ?config.cache.expiration,
        rules = config.cache.ttls.len(),
        "Response cache ready"
    );

    let app = build_router(cache);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    info!("Listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("✅ API Cache shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("APICACHE_CONFIG").ok());

    let config = match path {
        Some(path) if path.ends_with(".json") => AppConfig::load_from_json(&path).await?,
        Some(path) => AppConfig::load_from_file(&path).await?,
        None => AppConfig::from_env()?,
    };

    Ok(config)
}

/// Demo API with the cache layered over it, plus the admin routes
fn build_router(cache: Arc<ApiCache>) -> Router {
    let api = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user))
        .route("/time", get(current_time))
        .layer(CacheLayer::new(cache.clone()));

    Router::new()
        .merge(api)
        .merge(CacheAdminRouter::create_router(CacheAdminState { cache }))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
}

async fn list_users() -> Json<Value> {
    Json(json!([
        {"id": 1, "name": "Ada Lovelace"},
        {"id": 2, "name": "Grace Hopper"},
    ]))
}

async fn get_user(Path(id): Path<u64>) -> Result<Json<Value>, StatusCode> {
    match id {
        1 => Ok(Json(json!({"id": 1, "name": "Ada Lovelace"}))),
        2 => Ok(Json(json!({"id": 2, "name": "Grace Hopper"}))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn create_user(Json(user): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(user))
}

/// Changes every second; repeated calls return the cached value
async fn current_time() -> Json<Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    Json(json!({"unix_time": now}))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
