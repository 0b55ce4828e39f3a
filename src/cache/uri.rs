//! Store construction from a connection URI.
//!
//! | URI | Store |
//! |-----|-------|
//! | `memory://` | [`MemoryCache`] with 10 000 entries |
//! | `memory://?max_entries=N` | [`MemoryCache`] with `N` entries |
//! | `null://` | [`NullCache`] |

use super::backend::{CacheBackend, MemoryCache, NullCache};
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Build a new store for `uri`.
pub fn backend_from_uri(uri: &str) -> Result<Arc<dyn CacheBackend>> {
    let parsed = Url::parse(uri).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid cache URI: {}", e),
            ErrorContext::new()
                .with_field_path("cache.uri")
                .with_details(uri)
                .with_source("cache_uri"),
        )
    })?;

    match parsed.scheme() {
        "memory" => {
            let mut max_entries = DEFAULT_MAX_ENTRIES;
            for (name, value) in parsed.query_pairs() {
                match &*name {
                    "max_entries" => {
                        max_entries = value.parse::<usize>().map_err(|e| {
                            Error::configuration_with_context(
                                "max_entries must be a positive integer",
                                ErrorContext::new()
                                    .with_field_path("cache.uri")
                                    .with_details(format!("{:?}: {}", value, e))
                                    .with_source("cache_uri"),
                            )
                        })?;
                    }
                    other => {
                        return Err(Error::configuration_with_context(
                            format!("unknown memory cache option '{}'", other),
                            ErrorContext::new()
                                .with_field_path("cache.uri")
                                .with_source("cache_uri"),
                        ))
                    }
                }
            }
            Ok(Arc::new(MemoryCache::new(max_entries)))
        }
        "null" => Ok(Arc::new(NullCache::new())),
        other => Err(Error::configuration_with_context(
            format!("unsupported cache scheme '{}'", other),
            ErrorContext::new()
                .with_field_path("cache.uri")
                .with_details(uri)
                .with_source("cache_uri"),
        )),
    }
}

static SHARED: once_cell::sync::Lazy<RwLock<HashMap<String, Arc<dyn CacheBackend>>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(HashMap::new()));

/// The process-wide store for `uri`; every endpoint configured with the
/// same URI shares one instance.
pub fn shared_backend(uri: &str) -> Result<Arc<dyn CacheBackend>> {
    if let Some(existing) = SHARED.read().ok().and_then(|m| m.get(uri).cloned()) {
        return Ok(existing);
    }
    let mut shared = SHARED.write().map_err(|_| {
        Error::runtime_with_context(
            "shared backend registry poisoned",
            ErrorContext::new().with_source("cache_uri"),
        )
    })?;
    if let Some(existing) = shared.get(uri) {
        return Ok(existing.clone());
    }
    let backend = backend_from_uri(uri)?;
    tracing::debug!("Created shared {} cache backend for {}", backend.name(), uri);
    shared.insert(uri.to_string(), backend.clone());
    Ok(backend)
}
