//! # In-Memory Cache Store
//!
//! A process-local [`CacheStore`] with Redis semantics: values expire lazily
//! on access, `INCR` keeps an existing expiry, and `EXPIRE` on a missing key
//! reports `false`. Time comes from `tokio::time`, so tests can pause and
//! advance the clock.
//!
//! Expired entries nobody reads again are swept on writes, at most once per
//! `cleanup_interval`.

use super::CacheStore;
use crate::core::error::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default spacing between sweeps of expired entries
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// In-memory cache store
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
    cleanup_interval: Duration,
    created: Instant,
    /// Milliseconds after `created` of the last sweep
    last_sweep: Arc<AtomicU64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_cleanup_interval(DEFAULT_CLEANUP_INTERVAL)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sweeps expired entries at most once per `cleanup_interval`
    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            cleanup_interval,
            created: Instant::now(),
            last_sweep: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries held in memory, expired or not
    pub fn physical_len(&self) -> usize {
        self.entries.len()
    }

    /// Remaining time to live of a key; `None` when absent or without expiry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            entry
                .expires_at
                .filter(|deadline| *deadline > now)
                .map(|deadline| deadline - now)
        })
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired in-memory cache entries");
        }
        removed
    }

    /// Purge if `cleanup_interval` has passed since the last sweep.
    /// Must not be called while holding an entry guard.
    fn sweep_if_due(&self) {
        let elapsed = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        let interval = u64::try_from(self.cleanup_interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_sweep.load(Ordering::Relaxed);

        if elapsed.saturating_sub(last) < interval {
            return;
        }

        // one writer wins the sweep
        if self
            .last_sweep
            .compare_exchange(last, elapsed, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    fn deadline(ttl: Duration) -> Option<Instant> {
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        self.entries.remove_if(key, |_, value| value.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.sweep_if_due();
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, value)) if !value.is_expired(now) => Ok(1),
            _ => Ok(0),
        }
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.sweep_if_due();
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                if stored.is_expired(now) {
                    *stored = StoredValue {
                        value: b"1".to_vec(),
                        expires_at: None,
                    };
                    return Ok(1);
                }

                let current: i64 = std::str::from_utf8(&stored.value)
                    .ok()
                    .and_then(|text| text.parse().ok())
                    .ok_or_else(|| {
                        CacheError::store_unavailable("value is not an integer or out of range")
                    })?;
                let next = current.checked_add(1).ok_or_else(|| {
                    CacheError::store_unavailable("increment or decrement would overflow")
                })?;

                stored.value = next.to_string().into_bytes();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    value: b"1".to_vec(),
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                // Redis deletes a key given a non-positive expiry
                if ttl.is_zero() {
                    drop(entry);
                    self.entries.remove(key);
                } else {
                    entry.expires_at = Some(now + ttl);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn time_to_live(&self, key: &str) -> CacheResult<Option<Duration>> {
        Ok(self.ttl(key))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = InMemoryStore::new();

        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);

        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.delete("k").await.unwrap(), 0);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryStore::new();
        store.set("k", b"one", Duration::from_secs(60)).await.unwrap();
        store.set("k", b"two", Duration::ZERO).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let store = InMemoryStore::new();
        store.set("k", b"v", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.delete("k").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_and_expire() {
        let store = InMemoryStore::new();

        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert!(store.expire("c", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.incr("c").await.unwrap(), 2);
        // INCR keeps the expiry
        assert_eq!(store.ttl("c"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.ttl("c"), None);
    }

    #[tokio::test]
    async fn test_incr_non_integer_fails() {
        let store = InMemoryStore::new();
        store.set("k", b"abc", Duration::ZERO).await.unwrap();
        assert!(store.incr("k").await.is_err());
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = InMemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryStore::new();
        store.set("short", b"1", Duration::from_secs(1)).await.unwrap();
        store.set("long", b"2", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries() {
        let store = InMemoryStore::new();

        for i in 0..1000 {
            let key = format!("get__items__page={}", i);
            store.set(&key, b"payload", Duration::from_secs(30)).await.unwrap();

            let counter = format!("{}:rate-limit", key);
            store.incr(&counter).await.unwrap();
            store.expire(&counter, Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(store.physical_len(), 2000);

        tokio::time::advance(Duration::from_secs(3600)).await;

        for i in 0..10 {
            let key = format!("get__fresh__page={}", i);
            store.set(&key, b"payload", Duration::from_secs(30)).await.unwrap();
        }

        assert_eq!(store.len(), 10);
        assert_eq!(store.physical_len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_waits_for_interval() {
        let store = InMemoryStore::with_cleanup_interval(Duration::from_secs(120));
        assert_eq!(store.cleanup_interval(), Duration::from_secs(120));

        store.set("old", b"1", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        store.set("new", b"2", Duration::from_secs(1000)).await.unwrap();
        assert_eq!(store.physical_len(), 2);

        tokio::time::advance(Duration::from_secs(120)).await;
        store.incr("counter").await.unwrap();
        assert_eq!(store.physical_len(), 2);
        assert_eq!(store.get("old").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_to_live() {
        let store = InMemoryStore::new();
        store.incr("c").await.unwrap();
        assert_eq!(store.time_to_live("c").await.unwrap(), None);

        store.expire("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.time_to_live("c").await.unwrap(), Some(Duration::from_secs(60)));
        assert_eq!(store.time_to_live("missing").await.unwrap(), None);
    }
}
