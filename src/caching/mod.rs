//! # Caching System Module
//!
//! HTTP response caching over a Redis-compatible key-value store.
//!
//! ## Architecture
//! The caching system follows a layered approach:
//! 1. **Key Generator**: deterministic, case-normalised keys from method, path and query
//! 2. **Codec**: MessagePack, then optional gzip, then base64
//! 3. **TTL Resolver**: ordered endpoint rules with a global default
//! 4. **Rate Limiter**: fixed-window gate on cache writes
//! 5. **Cache Stores**: Redis and in-memory implementations of [`CacheStore`]
//! 6. **Engine**: [`ApiCache`] composing the above
//! 7. **Middleware**: [`CacheLayer`] serving hits and capturing misses
//! 8. **Admin Interface**: explicit invalidation over HTTP
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use api_cache::caching::{ApiCache, CacheLayer, InMemoryStore};
//! use api_cache::core::config::CacheConfig;
//! use axum::{routing::get, Router};
//!
//! # fn build() -> api_cache::core::error::CacheResult<Router> {
//! let config = CacheConfig::default().with_prefix("svc:");
//! let cache = Arc::new(ApiCache::new(Arc::new(InMemoryStore::new()), config)?);
//!
//! let app = Router::new()
//!     .route("/users", get(|| async { "[]" }))
//!     .layer(CacheLayer::new(cache));
//! # Ok(app)
//! # }
//! ```

pub mod admin;
pub mod api_cache;
pub mod codec;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit;
pub mod stores;
pub mod ttl;

pub use self::admin::{CacheAdminRouter, CacheAdminState};
pub use self::api_cache::{ApiCache, CacheLookup, CacheWrite};
pub use self::codec::{CacheCodec, CachePayload};
pub use self::key_generator::{build_key, KeyGenerator, KeyStrategy, RequestDescriptor};
pub use self::middleware::{CacheLayer, CacheService, X_CACHE};
pub use self::rate_limit::RateLimiter;
pub use self::stores::{CacheStore, InMemoryStore, RedisStore, RedisStoreConfig};
pub use self::ttl::resolve_ttl;
