//! # Cache Stores Module
//!
//! The contract the cache expects from its key-value store (a subset of the
//! Redis command set) and two implementations:
//!
//! - [`RedisStore`]: the production backend
//! - [`InMemoryStore`]: a process-local store with the same semantics, used
//!   by tests and single-instance deployments

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::core::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for cache store implementations.
///
/// Every method is a single round trip to the store. Transport failures
/// surface as `CacheError::StoreUnavailable`. Individual operations are
/// atomic with respect to concurrent callers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `GET key`: the stored value, or `None` when absent or expired
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// `SET key value` with an expiry; a zero `ttl` stores without expiry
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// `DEL key`: number of keys removed (0 or 1)
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// `INCR key`: the value after incrementing; a missing key counts from 0
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// `EXPIRE key`: `false` when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// `PTTL key`: remaining expiry, `None` when the key is missing or never expires
    async fn time_to_live(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}
