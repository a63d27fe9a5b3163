//! # API Cache Library
//!
//! Transparent HTTP response caching for axum/tower services, backed by a
//! Redis-compatible key-value store.
//!
//! GET responses are stored under a deterministic key derived from the
//! request's method, path and query. Payloads are serialized with MessagePack,
//! optionally gzip-compressed and base64 encoded. Each entry's time-to-live
//! comes from an ordered list of endpoint rules, and cache writes pass
//! through a per-key fixed-window rate limiter.
//!
//! Caching is best-effort: store outages, corrupt entries and rate-limit
//! denials are logged, and the request is served as if no cache were there.

/// Error types and configuration
pub mod core;

/// Cache engine, stores, middleware and admin endpoints
pub mod caching;

/// Logging setup
pub mod observability;

pub use crate::caching::{ApiCache, CacheLayer, CacheLookup, CacheStore, CacheWrite, RequestDescriptor};
pub use crate::core::config::{AppConfig, CacheConfig, EndpointTtl};
pub use crate::core::error::{CacheError, CacheResult};
