//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` seeded from the
//! configured level (any `RUST_LOG` directives are layered on top) and either
//! a human-readable or a JSON `fmt` layer.

use tracing::{warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{CacheError, CacheResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Parse a textual log level, falling back to `INFO`
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the filter used by [`init_logging`]
pub fn build_filter(config: &LogConfig) -> CacheResult<EnvFilter> {
    let level = parse_level(&config.level);

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .map_err(|e| CacheError::config(format!("Invalid RUST_LOG directives: {}", e)))?;

    Ok(filter)
}

/// Initialise the global subscriber.
///
/// Calling this more than once is harmless: the second installation fails
/// inside `tracing-subscriber` and is reported as a warning.
pub fn init_logging(config: &LogConfig) -> CacheResult<()> {
    let env_filter = build_filter(config)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LogConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
