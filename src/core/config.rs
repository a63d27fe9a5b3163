//! # Configuration Module
//!
//! Configuration structures for the response cache and the demo server.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`"24h"`, `"90s"`) via `humantime_serde`
//! - Environment variable support with a fixed precedence:
//!   an explicitly supplied [`CacheConfig`] always wins over the environment
//! - Validation with detailed error messages

use crate::caching::key_generator::KeyStrategy;
use crate::caching::stores::RedisStoreConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::observability::config::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the cache key prefix
pub const PREFIX_ENV_VAR: &str = "APICACHE_PREFIX";

/// Environment variable holding the global default TTL in whole seconds
pub const EXPIRATION_SECONDS_ENV_VAR: &str = "APICACHE_EXPIRATION_SECONDS";

/// Default TTL applied when no endpoint rule matches
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-endpoint TTL override
///
/// Matched against the request's decoded path (leading `/` included) and its
/// method, both compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTtl {
    pub path: String,
    pub method: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl EndpointTtl {
    pub fn new<P: Into<String>, M: Into<String>>(path: P, method: M, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            ttl,
        }
    }
}

/// Write-path rate limiting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Cache writes admitted per key and window
    pub max_writes: u64,

    /// Fixed window length, started by the first write
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_writes: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Response cache configuration
///
/// Immutable once handed to [`ApiCache`](crate::caching::ApiCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Global default TTL
    #[serde(with = "humantime_serde")]
    pub expiration: Duration,

    /// Prepended to every cache key
    pub prefix: String,

    /// Ordered endpoint overrides; first exact match wins
    pub ttls: Vec<EndpointTtl>,

    /// How request components are folded into a key
    pub key_strategy: KeyStrategy,

    /// Gzip the serialized payload before base64 encoding
    pub compression: bool,

    /// Rate limiting of cache population
    pub rate_limit: RateLimitConfig,

    /// Responses larger than this are forwarded but not cached
    pub max_body_bytes: usize,

    /// `Content-Type` sent with cache hits
    pub content_type: String,

    /// Funnel all store traffic of one engine through a single mutex
    pub serialize_store_access: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            prefix: String::new(),
            ttls: Vec::new(),
            key_strategy: KeyStrategy::default(),
            compression: true,
            rate_limit: RateLimitConfig::default(),
            max_body_bytes: 1024 * 1024, // 1MB
            content_type: "application/json".to_string(),
            serialize_store_access: false,
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with `APICACHE_PREFIX` / `APICACHE_EXPIRATION_SECONDS`
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup(PREFIX_ENV_VAR) {
            config.prefix = prefix;
        }

        if let Some(seconds) = lookup(EXPIRATION_SECONDS_ENV_VAR) {
            let seconds: u64 = seconds.trim().parse().map_err(|e| {
                CacheError::config(format!("Invalid {}: {}", EXPIRATION_SECONDS_ENV_VAR, e))
            })?;
            config.expiration = Duration::from_secs(seconds);
        }

        Ok(config)
    }

    /// Pick the effective configuration.
    ///
    /// An explicit configuration always wins. The environment is only
    /// consulted when no explicit configuration is supplied and `use_env`
    /// is set; otherwise the defaults apply.
    pub fn resolve(explicit: Option<CacheConfig>, use_env: bool) -> CacheResult<Self> {
        let config = match explicit {
            Some(config) => config,
            None if use_env => Self::from_env()?,
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Append an endpoint rule (declaration order is match order)
    pub fn with_ttl<P: Into<String>, M: Into<String>>(
        mut self,
        path: P,
        method: M,
        ttl: Duration,
    ) -> Self {
        self.ttls.push(EndpointTtl::new(path, method, ttl));
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> CacheResult<()> {
        let mut errors = Vec::new();

        for (index, rule) in self.ttls.iter().enumerate() {
            if rule.path.is_empty() {
                errors.push(format!("ttls[{}]: path must not be empty", index));
            }
            if rule.method.is_empty() {
                errors.push(format!("ttls[{}]: method must not be empty", index));
            }
        }

        if self.rate_limit.max_writes == 0 {
            errors.push("rate_limit.max_writes must be greater than zero".to_string());
        }

        if self.rate_limit.window.is_zero() {
            errors.push("rate_limit.window must be greater than zero".to_string());
        }

        if self.content_type.is_empty() {
            errors.push("content_type must not be empty".to_string());
        }

        if !errors.is_empty() {
            return Err(CacheError::config(errors.join("; ")));
        }

        Ok(())
    }
}

/// HTTP listener settings for the demo server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete configuration of the `api-cache` binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub redis: RedisStoreConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration without a file: defaults, cache section from the environment
    pub fn from_env() -> CacheResult<Self> {
        let mut config = AppConfig {
            cache: CacheConfig::from_env()?,
            ..Default::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply infrastructure overrides (`APICACHE_<FIELD>`).
    ///
    /// The cache section is left alone: a file-supplied cache
    /// configuration is explicit and wins over `APICACHE_PREFIX` and
    /// `APICACHE_EXPIRATION_SECONDS`.
    pub fn apply_env_overrides(&mut self) -> CacheResult<()> {
        if let Ok(url) = env::var("APICACHE_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(addr) = env::var("APICACHE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(timeout) = env::var("APICACHE_REDIS_TIMEOUT") {
            self.redis.operation_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| CacheError::config(format!("Invalid APICACHE_REDIS_TIMEOUT: {}", e)))?;
        }

        if let Ok(level) = env::var("APICACHE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("APICACHE_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(CacheError::config(format!(
                        "Invalid APICACHE_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        Ok(())
    }

    pub fn validate(&self) -> CacheResult<()> {
        self.cache.validate()?;

        if self.redis.url.is_empty() {
            return Err(CacheError::config("redis.url must not be empty"));
        }

        if self.server.bind_address.is_empty() {
            return Err(CacheError::config("server.bind_address must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.expiration, Duration::from_secs(86_400));
        assert_eq!(config.prefix, "");
        assert!(config.ttls.is_empty());
        assert!(config.compression);
        assert_eq!(config.rate_limit.max_writes, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_lookup_overlays_defaults() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            (PREFIX_ENV_VAR, "svc:"),
            (EXPIRATION_SECONDS_ENV_VAR, "300"),
        ]))
        .unwrap();

        assert_eq!(config.prefix, "svc:");
        assert_eq!(config.expiration, Duration::from_secs(300));
        assert!(config.compression);
    }

    #[test]
    fn test_env_lookup_rejects_bad_expiration() {
        let result = CacheConfig::from_lookup(lookup_from(&[(EXPIRATION_SECONDS_ENV_VAR, "soon")]));
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }

    #[test]
    fn test_explicit_config_wins() {
        let explicit = CacheConfig::default().with_prefix("explicit:");
        let resolved = CacheConfig::resolve(Some(explicit.clone()), true).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn test_resolve_without_env_uses_defaults() {
        let resolved = CacheConfig::resolve(None, false).unwrap();
        assert_eq!(resolved, CacheConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CacheConfig::default().with_ttl("", "GET", Duration::from_secs(1));
        config.rate_limit.max_writes = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ttls[0]: path must not be empty"));
        assert!(err.contains("rate_limit.max_writes"));
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
expiration: 1h
prefix: "api:"
ttls:
  - path: /a
    method: GET
    ttl: 5s
  - path: /b
    method: POST
    ttl: 10s
rate_limit:
  max_writes: 3
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.expiration, Duration::from_secs(3600));
        assert_eq!(config.prefix, "api:");
        assert_eq!(config.ttls[0], EndpointTtl::new("/a", "GET", Duration::from_secs(5)));
        assert_eq!(config.ttls[1].ttl, Duration::from_secs(10));
        assert_eq!(config.rate_limit.max_writes, 3);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.content_type, "application/json");
    }

    #[tokio::test]
    async fn test_load_app_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  bind_address: "127.0.0.1:9000"
cache:
  prefix: "file:"
  expiration: 10m
redis:
  url: "redis://cache.internal:6379"
logging:
  level: debug
  format: Text
"#
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.cache.prefix, "file:");
        assert_eq!(config.cache.expiration, Duration::from_secs(600));
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_shipped_sample_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/api-cache.yaml");
        let config = AppConfig::load_from_file(path).await.unwrap();

        assert_eq!(config.cache.prefix, "demo:");
        assert_eq!(config.cache.key_strategy, KeyStrategy::Concatenated);
        assert_eq!(
            config.cache.ttls[0],
            EndpointTtl::new("/time", "GET", Duration::from_secs(5))
        );
        assert_eq!(config.redis.retry_delay, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = AppConfig::load_from_file("/definitely/not/here.yaml").await;
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }
}
