//! # Cache storage
//!
//! Storage side of endpoint caching: key derivation, the pluggable store
//! and the per-endpoint manager that applies TTL and counts hits.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKeyGenerator`] | Namespaced SHA-256 keys from canonical argument records |
//! | [`CacheBackend`] | Trait for implementing custom stores |
//! | [`MemoryCache`] | In-process LRU store with per-entry TTL |
//! | [`NullCache`] | Store that never retains anything |
//! | [`CacheManager`] | TTL-applying, JSON-encoding view of a store with statistics |
//! | [`backend_from_uri`] | Store construction from `cache.uri` |
//!
//! ## Example
//!
//! ```rust
//! use endpoint_cache::cache::{CacheKey, CacheManager, MemoryCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let manager = CacheManager::new(Arc::new(MemoryCache::new(1000)), Duration::from_secs(3600));
//! let key = CacheKey::new("users.lookup", "3f2a");
//! manager.set(&key, &"cached").await?;
//! assert_eq!(manager.get::<String>(&key).await?.as_deref(), Some("cached"));
//! # Ok::<(), endpoint_cache::Error>(())
//! # }).unwrap();
//! ```

mod backend;
mod key;
mod manager;
mod uri;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheManager, CacheStats};
pub use uri::{backend_from_uri, shared_backend, DEFAULT_MAX_ENTRIES};
