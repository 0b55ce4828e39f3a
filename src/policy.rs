//! Per-endpoint cache policy and the registration surface that produces it.
//!
//! A policy is built once, when an endpoint is registered, and is
//! read-only afterwards.
//!
//! ```rust
//! use endpoint_cache::policy::{cache_config, disable_cache};
//! use std::time::Duration;
//!
//! let policy = cache_config()
//!     .ttl(Duration::from_secs(60))
//!     .namespace("users.lookup")
//!     .apply("users::lookup");
//! assert_eq!(policy.namespace(), "users.lookup");
//!
//! let off = disable_cache().apply("users::delete");
//! assert!(!off.enabled());
//! ```

use std::time::Duration;

/// Default TTL of the registration surface (`cache_config()`).
pub const DEFAULT_OPTIONS_TTL: Duration = Duration::from_secs(60 * 60);

/// Static caching settings attached to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    endpoint: String,
    namespace: String,
    enabled: bool,
    ttl: Duration,
}

impl CachePolicy {
    /// Defaults derived purely from the endpoint identity: enabled,
    /// namespaced by identity, process-wide default TTL.
    pub fn for_endpoint(identity: impl Into<String>) -> Self {
        Self::for_endpoint_with_ttl(identity, crate::settings::global().ttl)
    }

    /// Like [`CachePolicy::for_endpoint`] with an explicit default TTL.
    pub fn for_endpoint_with_ttl(identity: impl Into<String>, ttl: Duration) -> Self {
        let endpoint = identity.into();
        Self {
            namespace: endpoint.clone(),
            endpoint,
            enabled: true,
            ttl,
        }
    }

    pub fn disabled(identity: impl Into<String>) -> Self {
        disable_cache().apply(identity)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Options given at registration time; [`CacheOptions::apply`] turns them
/// into a [`CachePolicy`] for a concrete endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    enabled: bool,
    ttl: Duration,
    namespace: Option<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_OPTIONS_TTL,
            namespace: None,
        }
    }
}

impl CacheOptions {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Bind the options to an endpoint. The namespace falls back to the
    /// endpoint identity.
    pub fn apply(self, identity: impl Into<String>) -> CachePolicy {
        let endpoint = identity.into();
        CachePolicy {
            namespace: self.namespace.unwrap_or_else(|| endpoint.clone()),
            endpoint,
            enabled: self.enabled,
            ttl: self.ttl,
        }
    }
}

/// Start configuring caching for an endpoint (enabled, 1 hour TTL,
/// namespace = endpoint identity).
pub fn cache_config() -> CacheOptions {
    CacheOptions::default()
}

/// Options that turn caching off for an endpoint.
pub fn disable_cache() -> CacheOptions {
    cache_config().enabled(false)
}
