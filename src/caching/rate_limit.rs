//! Fixed-window limiter for cache population.
//!
//! Each identity gets a counter at `identity + ":rate-limit"`. The first
//! increment in a window attaches the window expiry; the counter disappears
//! with it and the next write starts a fresh window. A denied write checks
//! that the counter still carries an expiry and attaches one if not, so a
//! lost `EXPIRE` (or an `INCR` whose first reply never arrived) cannot lock a
//! key out for good. A failing store denies the write.

use crate::caching::key_generator::RATE_LIMIT_SUFFIX;
use crate::caching::stores::CacheStore;
use crate::core::config::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Write gate shared by every request of one cache engine
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    max_writes: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>, max_writes: u64, window: Duration) -> Self {
        Self {
            store,
            max_writes,
            window,
        }
    }

    pub fn from_config(store: Arc<dyn CacheStore>, config: &RateLimitConfig) -> Self {
        Self::new(store, config.max_writes, config.window)
    }

    /// Counter key tracked for `identity_key`
    pub fn counter_key(identity_key: &str) -> String {
        format!("{}{}", identity_key, RATE_LIMIT_SUFFIX)
    }

    /// Count one write attempt for `identity_key` and report whether it may proceed
    pub async fn allow(&self, identity_key: &str) -> bool {
        let counter = Self::counter_key(identity_key);

        let count = match self.store.incr(&counter).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %counter, error = %e, "Rate limit counter unavailable, denying cache write");
                return false;
            }
        };

        if count == 1 {
            self.start_window(&counter).await;
        }

        let allowed = count > 0 && (count as u64) <= self.max_writes;
        if !allowed {
            debug!(key = %counter, count, limit = self.max_writes, "Cache write rate limited");
            if count != 1 {
                self.repair_window(&counter).await;
            }
        }
        allowed
    }

    async fn start_window(&self, counter: &str) {
        if let Err(e) = self.store.expire(counter, self.window).await {
            warn!(key = %counter, error = %e, "Failed to start rate limit window");
        }
    }

    /// Attach the window to a counter left without an expiry
    async fn repair_window(&self, counter: &str) {
        match self.store.time_to_live(counter).await {
            Ok(None) => {
                warn!(key = %counter, "Rate limit counter had no expiry, restarting window");
                self.start_window(counter).await;
            }
            Ok(Some(_)) => {}
            Err(e) => {
                warn!(key = %counter, error = %e, "Failed to inspect rate limit window");
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_writes", &self.max_writes)
            .field("window", &self.window)
            .finish()
    }
}
