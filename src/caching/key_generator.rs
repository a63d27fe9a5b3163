//! # Cache Key Generator
//!
//! Derives the deterministic, case-normalised key that identifies a cacheable
//! request. Two strategies are available:
//!
//! - [`KeyStrategy::Concatenated`] (default): `lower(prefix + METHOD + "__" + path + "__" + query)`
//!   where `path` has its leading `/` trimmed and `query` is the canonical,
//!   key-sorted form of the query string. This layout is shared with existing
//!   stored entries, so it must not change.
//! - [`KeyStrategy::Hashed`]: the same normalised components, length-delimited
//!   and hashed with SHA-256. No path or query value can make two different
//!   requests collide, at the cost of unreadable keys.

use axum::http::{Method, Request};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Separator between key components in the concatenated layout
pub const KEY_SEPARATOR: &str = "__";

/// Suffix appended to a request key to form its rate-limit counter key
pub const RATE_LIMIT_SUFFIX: &str = ":rate-limit";

/// Key generation strategy configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Readable keys compatible with existing stored entries
    #[default]
    Concatenated,

    /// Collision-free SHA-256 keys
    Hashed,
}

/// The parts of a request that take part in caching decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Decoded path, leading `/` included
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
}

impl RequestDescriptor {
    pub fn new<P: Into<String>>(method: Method, path: P, query: Option<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query,
        }
    }

    /// Describe an inbound HTTP request
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let uri = request.uri();
        let path = match urlencoding::decode(uri.path()) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => uri.path().to_string(),
        };

        Self {
            method: request.method().clone(),
            path,
            query: uri.query().map(str::to_string),
        }
    }

    /// Only GET responses are cached
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }
}

/// Builds cache keys for request descriptors
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
    prefix: String,
}

impl KeyGenerator {
    pub fn new<S: Into<String>>(strategy: KeyStrategy, prefix: S) -> Self {
        Self {
            strategy,
            prefix: prefix.into(),
        }
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Key under which the response to `request` is stored
    pub fn generate_key(&self, request: &RequestDescriptor) -> String {
        let query = request.query.as_deref().unwrap_or("");

        match self.strategy {
            KeyStrategy::Concatenated => {
                build_key(request.method.as_str(), &request.path, query, &self.prefix)
            }
            KeyStrategy::Hashed => {
                build_hashed_key(request.method.as_str(), &request.path, query, &self.prefix)
            }
        }
    }
}

/// Concatenated key for a method, path and raw query string
pub fn build_key(method: &str, path: &str, query: &str, prefix: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let query = canonical_query(query);

    let mut key = String::with_capacity(
        prefix.len() + method.len() + path.len() + query.len() + 2 * KEY_SEPARATOR.len(),
    );
    key.push_str(prefix);
    key.push_str(method);
    key.push_str(KEY_SEPARATOR);
    key.push_str(path);
    key.push_str(KEY_SEPARATOR);
    key.push_str(&query);

    key.to_lowercase()
}

/// Hashed key for a method, path and raw query string
pub fn build_hashed_key(method: &str, path: &str, query: &str, prefix: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path).to_lowercase();
    let query = canonical_query(query).to_lowercase();
    let method = method.to_lowercase();

    let mut hasher = Sha256::new();
    for component in [method.as_str(), path.as_str(), query.as_str()] {
        // length-delimited so no component can bleed into the next
        hasher.update((component.len() as u64).to_be_bytes());
        hasher.update(component.as_bytes());
    }

    format!("{}{}", prefix.to_lowercase(), hex::encode(hasher.finalize()))
}

/// Canonical query string: parameters stably sorted by name, names and
/// values re-escaped with `+` for spaces and `%XX` for everything outside
/// `[A-Za-z0-9-_.~]`. Values of a repeated name keep their relative order.
pub fn canonical_query(raw: &str) -> String {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    if raw.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> =
        url::form_urlencoded::parse(raw.as_bytes()).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", query_escape(name), query_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn query_escape(component: &str) -> String {
    urlencoding::encode(component).replace("%20", "+")
}
