//! TTL resolution: ordered endpoint overrides with a global fallback.

use crate::core::config::EndpointTtl;
use std::time::Duration;

/// Duration of the first rule whose path and method both equal the request's,
/// or `default_ttl` when none does.
pub fn resolve_ttl(method: &str, path: &str, rules: &[EndpointTtl], default_ttl: Duration) -> Duration {
    rules
        .iter()
        .find(|rule| rule.path == path && rule.method == method)
        .map(|rule| rule.ttl)
        .unwrap_or(default_ttl)
}
