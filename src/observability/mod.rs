//! # Observability Module
//!
//! Logging setup for the cache. Library code only emits `tracing` events;
//! installing a subscriber is left to the binary (or to the embedding
//! application) through [`init_logging`].

// Logging configuration
pub mod config;

// Subscriber initialisation
pub mod logging;

pub use config::{LogConfig, LogFormat};
pub use logging::init_logging;
