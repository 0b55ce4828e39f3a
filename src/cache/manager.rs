//! Cache manager.

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A store bound to one endpoint's TTL, with JSON encoding of values and
/// hit/miss accounting. Every failure is returned to the caller.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    stats: AtomicStats,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            stats: AtomicStats::new(),
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        match self.backend.exists(&key.storage_key()).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        match self.backend.get(&key.storage_key()).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(val) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(val))
                }
                Err(e) => Err(self.failed(Error::store_with_context(
                    format!("stored entry cannot be decoded: {}", e),
                    ErrorContext::new()
                        .with_field_path(key.to_string())
                        .with_source(self.backend.name()),
                ))),
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    /// Store `value` under `key` with this manager's TTL.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        match self.backend.set(&key.storage_key(), &data, self.ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        match self.backend.delete(&key.storage_key()).await {
            Ok(d) => {
                if d {
                    self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(d)
            }
            Err(e) => Err(self.failed(e)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn failed(&self, e: Error) -> Error {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn manager() -> (Arc<MemoryCache>, CacheManager) {
        let backend = Arc::new(MemoryCache::new(16));
        let manager = CacheManager::new(backend.clone(), Duration::from_secs(60));
        (backend, manager)
    }

    #[tokio::test]
    async fn test_set_get_counts() {
        let (_, m) = manager();
        let key = CacheKey::new("ns", "abc");
        assert!(!m.exists(&key).await.unwrap());
        m.set(&key, &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<i32>> = m.get(&key).await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        assert!(m.delete(&key).await.unwrap());

        let stats = m.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_writes_under_namespaced_key() {
        let (backend, m) = manager();
        let key = CacheKey::new("Foo.bar", "abc");
        m.set(&key, &42).await.unwrap();
        assert!(backend.exists("Foo.bar:abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_store_error() {
        let (backend, m) = manager();
        backend
            .set("ns:bad", b"not json", Duration::from_secs(60))
            .await
            .unwrap();
        let err = m.get::<i32>(&CacheKey::new("ns", "bad")).await.unwrap_err();
        assert!(err.is_store());
        assert_eq!(m.stats().errors, 1);
    }
}
