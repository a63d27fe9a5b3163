//! # Redis Cache Store
//!
//! [`CacheStore`] backed by Redis through a multiplexed
//! [`ConnectionManager`], which re-establishes dropped connections on its own.
//!
//! Every command runs under `operation_timeout`. I/O failures and timeouts are
//! retried up to `max_retries` times with a linear back-off; command errors
//! (wrong type, bad argument) are returned straight away. `INCR` is never
//! retried, since a timed-out attempt may already have been applied. Whatever
//! remains is reported as `CacheError::StoreUnavailable`.

use super::CacheStore;
use crate::core::error::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Time allowed to establish the initial connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Upper bound for a single command round trip
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Retries after a transport failure
    pub max_retries: u32,

    /// Base delay between retries, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(1),
            max_retries: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Counters kept by [`RedisStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub connection_errors: u64,
    pub timeouts: u64,
}

type RedisOp<T> = BoxFuture<'static, RedisResult<T>>;

/// Millisecond expiry for `PX`/`PEXPIRE`; sub-millisecond durations round up to 1
fn expiry_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        0
    } else {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

/// Redis-backed cache store
#[derive(Clone)]
pub struct RedisStore {
    config: RedisStoreConfig,
    connection: ConnectionManager,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
    timeouts: Arc<AtomicU64>,
}

impl RedisStore {
    /// Connect to the configured Redis instance
    pub async fn connect(config: RedisStoreConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::store_unavailable(format!(
                    "timed out connecting to {} after {:?}",
                    config.url, config.connection_timeout
                ))
            })??;

        info!(url = %config.url, "Redis cache store connected");

        Ok(Self {
            config,
            connection,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
            timeouts: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    pub fn stats(&self) -> RedisStoreStats {
        RedisStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Execute a Redis operation with timeout and retry logic
    async fn execute_with_retry<F, T>(&self, command: &'static str, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> RedisOp<T> + Send + Sync,
        T: Send,
    {
        self.execute(command, self.config.max_retries, operation).await
    }

    /// Execute a Redis operation under the operation timeout, retrying transport
    /// failures up to `max_retries` times
    async fn execute<F, T>(&self, command: &'static str, max_retries: u32, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> RedisOp<T> + Send + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            let attempt = tokio::time::timeout(
                self.config.operation_timeout,
                operation(self.connection.clone()),
            )
            .await;

            let error = match attempt {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if !e.is_io_error() => {
                    warn!(command, error = %e, "Redis command failed");
                    return Err(e.into());
                }
                Ok(Err(e)) => {
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);
                    CacheError::from(e)
                }
                Err(elapsed) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    CacheError::from(elapsed)
                }
            };

            if retries >= max_retries {
                warn!(command, retries, error = %error, "Redis operation failed");
                return Err(error);
            }

            retries += 1;
            debug!(command, retries, error = %error, "Retrying Redis operation");
            tokio::time::sleep(self.config.retry_delay * retries).await;
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = key.to_string();

        let result = self
            .execute_with_retry("GET", |mut conn| {
                let key = key.clone();
                Box::pin(async move { conn.get::<_, Option<Vec<u8>>>(&key).await })
            })
            .await?;

        match &result {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Redis cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Redis cache miss");
            }
        }

        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        let ttl_millis = expiry_millis(ttl);

        self.execute_with_retry("SET", |mut conn| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move {
                let mut pipe = redis::pipe();
                let set = pipe.cmd("SET").arg(&key).arg(value);
                if ttl_millis > 0 {
                    set.arg("PX").arg(ttl_millis);
                }
                set.ignore();
                pipe.query_async::<_, ()>(&mut conn).await
            })
        })
        .await?;

        debug!(key = %key, ttl = ?ttl, "Set Redis cache key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let key = key.to_string();

        let removed = self
            .execute_with_retry("DEL", |mut conn| {
                let key = key.clone();
                Box::pin(async move { conn.del::<_, u64>(&key).await })
            })
            .await?;

        if removed > 0 {
            debug!(key = %key, "Deleted Redis cache key");
        }

        Ok(removed)
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let key = key.to_string();

        self.execute("INCR", 0, |mut conn| {
            let key = key.clone();
            Box::pin(async move { conn.incr::<_, _, i64>(&key, 1).await })
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let key = key.to_string();
        let ttl_millis = expiry_millis(ttl);

        self.execute_with_retry("PEXPIRE", |mut conn| {
            let key = key.clone();
            Box::pin(async move {
                redis::cmd("PEXPIRE")
                    .arg(&key)
                    .arg(ttl_millis)
                    .query_async::<_, bool>(&mut conn)
                    .await
            })
        })
        .await
    }

    async fn time_to_live(&self, key: &str) -> CacheResult<Option<Duration>> {
        let key = key.to_string();

        let millis = self
            .execute_with_retry("PTTL", |mut conn| {
                let key = key.clone();
                Box::pin(async move { redis::cmd("PTTL").arg(&key).query_async::<_, i64>(&mut conn).await })
            })
            .await?;

        // -2: missing, -1: no expiry
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute_with_retry("PING", |mut conn| {
                Box::pin(async move { redis::cmd("PING").query_async::<_, String>(&mut conn).await })
            })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connects to `APICACHE_TEST_REDIS_URL` (e.g. `redis://127.0.0.1:6379/15`)
    async fn setup_redis_store() -> RedisStore {
        let url = std::env::var("APICACHE_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());

        RedisStore::connect(RedisStoreConfig {
            url,
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.operation_timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_config_from_yaml() {
        let config: RedisStoreConfig = serde_yaml::from_str(
            "url: redis://cache:6380/2\noperation_timeout: 250ms\nmax_retries: 0\n",
        )
        .unwrap();
        assert_eq!(config.url, "redis://cache:6380/2");
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_expiry_millis_rounds_up() {
        assert_eq!(expiry_millis(Duration::ZERO), 0);
        assert_eq!(expiry_millis(Duration::from_micros(1)), 1);
        assert_eq!(expiry_millis(Duration::from_micros(999)), 1);
        assert_eq!(expiry_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(expiry_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisStore::connect(RedisStoreConfig {
            url: "not-a-redis-url".to_string(),
            ..Default::default()
        })
        .await;
        assert!(matches!(result, Err(CacheError::StoreUnavailable { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (APICACHE_TEST_REDIS_URL)
    async fn test_basic_operations() {
        let store = setup_redis_store().await;

        let key = "apicache:test:basic";
        store.set(key, b"test_value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), Some(b"test_value".to_vec()));

        assert_eq!(store.delete(key).await.unwrap(), 1);
        assert_eq!(store.get(key).await.unwrap(), None);
        assert_eq!(store.delete(key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (APICACHE_TEST_REDIS_URL)
    async fn test_ttl_expiration() {
        let store = setup_redis_store().await;

        let key = "apicache:test:expire";
        store.set(key, b"expire_value", Duration::from_millis(300)).await.unwrap();
        assert!(store.get(key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (APICACHE_TEST_REDIS_URL)
    async fn test_incr_and_expire() {
        let store = setup_redis_store().await;

        let key = "apicache:test:counter";
        store.delete(key).await.unwrap();

        assert_eq!(store.incr(key).await.unwrap(), 1);
        assert_eq!(store.time_to_live(key).await.unwrap(), None);
        assert!(store.expire(key, Duration::from_secs(60)).await.unwrap());
        assert!(store.time_to_live(key).await.unwrap().is_some());
        assert_eq!(store.incr(key).await.unwrap(), 2);
        assert!(!store.expire("apicache:test:missing", Duration::from_secs(1)).await.unwrap());

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (APICACHE_TEST_REDIS_URL)
    async fn test_health_check_and_stats() {
        let store = setup_redis_store().await;
        assert!(store.health_check().await.unwrap());

        store.set("apicache:test:stats", b"v", Duration::from_secs(5)).await.unwrap();
        store.get("apicache:test:stats").await.unwrap();
        store.get("apicache:test:stats-missing").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
