//! # Response Cache Engine
//!
//! [`ApiCache`] ties the key generator, codec, TTL rules and write limiter to
//! an injected [`CacheStore`]. It is the programmatic surface of the cache:
//! the HTTP middleware and the admin endpoints are thin adapters over
//! [`ApiCache::get_cache`], [`ApiCache::set_cache`] and
//! [`ApiCache::invalidate`].
//!
//! Only GET requests take part in caching. Every other method gets an
//! explicit `NotApplicable` outcome and the store is never touched.

use crate::caching::codec::{CacheCodec, CachePayload};
use crate::caching::key_generator::{KeyGenerator, RequestDescriptor};
use crate::caching::rate_limit::RateLimiter;
use crate::caching::stores::CacheStore;
use crate::caching::ttl::resolve_ttl;
use crate::core::config::CacheConfig;
use crate::core::error::{CacheError, CacheResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachePayload),
    Miss,
    /// The request method is not cacheable
    NotApplicable,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn into_payload(self) -> Option<CachePayload> {
        match self {
            Self::Hit(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Outcome of a cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Stored { key: String, ttl: Duration },
    /// The write budget for this key is spent for the current window
    RateLimited { key: String },
    /// The request method is not cacheable
    NotApplicable,
}

impl CacheWrite {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }

    /// `Ok(true)` when stored, `Ok(false)` when not applicable and
    /// `CacheError::RateLimited` when the limiter denied the write
    pub fn into_result(self) -> CacheResult<bool> {
        match self {
            Self::Stored { .. } => Ok(true),
            Self::NotApplicable => Ok(false),
            Self::RateLimited { key } => Err(CacheError::RateLimited { key }),
        }
    }
}

/// The caching engine
pub struct ApiCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    keys: KeyGenerator,
    codec: CacheCodec,
    rate_limiter: RateLimiter,
    store_lock: Option<Mutex<()>>,
}

impl ApiCache {
    /// Create an engine over `store`; the configuration is validated first
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let keys = KeyGenerator::new(config.key_strategy, config.prefix.clone());
        let codec = CacheCodec::new(config.compression);
        let rate_limiter = RateLimiter::from_config(store.clone(), &config.rate_limit);
        let store_lock = config.serialize_store_access.then(|| Mutex::new(()));

        debug!(
            prefix = %config.prefix,
            expiration = ?config.expiration,
            rules = config.ttls.len(),
            compression = config.compression,
            "Response cache initialised"
        );

        Ok(Self {
            store,
            config,
            keys,
            codec,
            rate_limiter,
            store_lock,
        })
    }

    /// Create an engine from an optional explicit configuration, falling back
    /// to the environment when `use_env` is set (see [`CacheConfig::resolve`])
    pub fn from_options(
        store: Arc<dyn CacheStore>,
        config: Option<CacheConfig>,
        use_env: bool,
    ) -> CacheResult<Self> {
        Self::new(store, CacheConfig::resolve(config, use_env)?)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cache key for `request`, regardless of its method
    pub fn key_for(&self, request: &RequestDescriptor) -> String {
        self.keys.generate_key(request)
    }

    /// TTL a write for `request` would get
    pub fn ttl_for(&self, request: &RequestDescriptor) -> Duration {
        resolve_ttl(
            request.method.as_str(),
            &request.path,
            &self.config.ttls,
            self.config.expiration,
        )
    }

    async fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.store_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }

    /// Read the cached payload for `request`.
    ///
    /// Store failures come back as `StoreUnavailable`, unreadable entries as
    /// `Decode`; callers serving traffic treat both as a miss.
    pub async fn get_cache(&self, request: &RequestDescriptor) -> CacheResult<CacheLookup> {
        if !request.is_cacheable() {
            return Ok(CacheLookup::NotApplicable);
        }

        let key = self.key_for(request);

        let stored = {
            let _guard = self.lock().await;
            self.store.get(&key).await?
        };

        match stored {
            Some(stored) => {
                let payload: CachePayload = self.codec.decode(&stored)?;
                debug!(key = %key, "Cache hit");
                Ok(CacheLookup::Hit(payload))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(CacheLookup::Miss)
            }
        }
    }

    /// Store `payload` as the response for `request`.
    ///
    /// The write limiter runs first; a denial is a normal outcome, not an
    /// error. The TTL is the first matching endpoint rule or the global
    /// default.
    pub async fn set_cache<T>(&self, request: &RequestDescriptor, payload: &T) -> CacheResult<CacheWrite>
    where
        T: Serialize + ?Sized,
    {
        if !request.is_cacheable() {
            return Ok(CacheWrite::NotApplicable);
        }

        let key = self.key_for(request);

        let _guard = self.lock().await;

        if !self.rate_limiter.allow(&key).await {
            return Ok(CacheWrite::RateLimited { key });
        }

        let ttl = self.ttl_for(request);
        let encoded = self.codec.encode(payload)?;

        self.store.set(&key, encoded.as_bytes(), ttl).await?;

        debug!(key = %key, ttl = ?ttl, bytes = encoded.len(), "Cached response");
        Ok(CacheWrite::Stored { key, ttl })
    }

    /// Remove the entry for `request`; `true` only if one existed.
    ///
    /// Non-GET descriptors never match an entry and return `false`.
    pub async fn invalidate(&self, request: &RequestDescriptor) -> CacheResult<bool> {
        if !request.is_cacheable() {
            return Ok(false);
        }

        let key = self.key_for(request);

        let removed = {
            let _guard = self.lock().await;
            self.store.delete(&key).await?
        };

        debug!(key = %key, removed, "Invalidated cache entry");
        Ok(removed > 0)
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.store.health_check().await
    }
}

impl std::fmt::Debug for ApiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCache")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("codec", &self.codec)
            .field("rate_limiter", &self.rate_limiter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::InMemoryStore;
    use axum::http::Method;
    use serde_json::json;

    fn get(path: &str, query: Option<&str>) -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, path, query.map(str::to_string))
    }

    fn cache_with(config: CacheConfig) -> (ApiCache, InMemoryStore) {
        let store = InMemoryStore::new();
        let cache = ApiCache::new(Arc::new(store.clone()), config).unwrap();
        (cache, store)
    }

    #[tokio::test]
    async fn test_set_then_get_returns_payload() {
        let (cache, _) = cache_with(CacheConfig::default());
        let request = get("/users", Some("page=2"));
        let payload = CachePayload::from(br#"[{"id":1}]"#.to_vec());

        let write = cache.set_cache(&request, &payload).await.unwrap();
        assert!(write.is_stored());

        let lookup = cache.get_cache(&request).await.unwrap();
        assert_eq!(lookup, CacheLookup::Hit(payload));
    }

    #[tokio::test]
    async fn test_structured_payload() {
        let (cache, _) = cache_with(CacheConfig::default());
        let request = get("/profile", None);
        let value = json!({"name": "ada", "langs": ["en", "fr"]});

        cache.set_cache(&request, &value).await.unwrap();
        let lookup = cache.get_cache(&request).await.unwrap();
        assert_eq!(lookup.into_payload(), Some(CachePayload::Structured(value)));
    }

    #[tokio::test]
    async fn test_miss_for_unknown_key() {
        let (cache, _) = cache_with(CacheConfig::default());
        assert_eq!(cache.get_cache(&get("/nothing", None)).await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_non_get_is_not_applicable() {
        let (cache, store) = cache_with(CacheConfig::default());
        let post = RequestDescriptor::new(Method::POST, "/users", None);

        assert_eq!(cache.get_cache(&post).await.unwrap(), CacheLookup::NotApplicable);
        assert_eq!(
            cache.set_cache(&post, &CachePayload::from(b"x".to_vec())).await.unwrap(),
            CacheWrite::NotApplicable
        );
        assert!(!cache.invalidate(&post).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_reports_removal() {
        let (cache, _) = cache_with(CacheConfig::default());
        let request = get("/users", None);

        cache.set_cache(&request, &CachePayload::from(b"x".to_vec())).await.unwrap();
        assert!(cache.invalidate(&request).await.unwrap());
        assert!(!cache.invalidate(&request).await.unwrap());
        assert_eq!(cache.get_cache(&request).await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_ttl_applied() {
        let config = CacheConfig::default().with_ttl("/short", "GET", Duration::from_secs(5));
        let (cache, store) = cache_with(config);

        let short = get("/short", None);
        let other = get("/other", None);
        let write = cache.set_cache(&short, &CachePayload::from(b"s".to_vec())).await.unwrap();
        cache.set_cache(&other, &CachePayload::from(b"o".to_vec())).await.unwrap();

        assert_eq!(
            write,
            CacheWrite::Stored {
                key: "get__short__".to_string(),
                ttl: Duration::from_secs(5)
            }
        );
        assert_eq!(store.ttl("get__other__"), Some(Duration::from_secs(24 * 60 * 60)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get_cache(&short).await.unwrap(), CacheLookup::Miss);
        assert!(cache.get_cache(&other).await.unwrap().is_hit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_write_is_rate_limited() {
        let (cache, _) = cache_with(CacheConfig::default());
        let request = get("/hot", None);
        let payload = CachePayload::from(b"x".to_vec());

        for _ in 0..10 {
            assert!(cache.set_cache(&request, &payload).await.unwrap().is_stored());
        }

        let denied = cache.set_cache(&request, &payload).await.unwrap();
        assert_eq!(denied, CacheWrite::RateLimited { key: "get__hot__".to_string() });
        assert!(matches!(denied.into_result(), Err(CacheError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_prefix_and_key_layout() {
        let (cache, store) = cache_with(CacheConfig::default().with_prefix("App:"));
        let request = get("/Users/List", Some("b=2&a=1"));

        assert_eq!(cache.key_for(&request), "app:get__users/list__a=1&b=2");

        cache.set_cache(&request, &CachePayload::from(b"x".to_vec())).await.unwrap();
        assert!(store.get("app:get__users/list__a=1&b=2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_decode_error() {
        let (cache, store) = cache_with(CacheConfig::default());
        store.set("get__bad__", b"%%%", Duration::ZERO).await.unwrap();

        let result = cache.get_cache(&get("/bad", None)).await;
        assert!(matches!(result, Err(CacheError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_serialized_store_access() {
        let config = CacheConfig {
            serialize_store_access: true,
            ..CacheConfig::default()
        };
        let (cache, _) = cache_with(config);
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let request = get(&format!("/item/{}", i), None);
                cache.set_cache(&request, &CachePayload::from(vec![i as u8])).await.unwrap();
                cache.get_cache(&request).await.unwrap()
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), CacheLookup::Hit(CachePayload::from(vec![i as u8])));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CacheConfig::default().with_ttl("", "GET", Duration::from_secs(1));
        let result = ApiCache::new(Arc::new(InMemoryStore::new()), config);
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }
}
