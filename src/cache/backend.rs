//! Cache backend implementations.

use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Key-value store behind the cache. Keys arrive already namespaced.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Store `value`; it must stop being visible once `ttl` has elapsed.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

// Expiry used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            expires_at: now
                .checked_add(ttl)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process store bounded to `max_entries`, evicting the least
/// recently used entry when full.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(self.lock()?.cap().get())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        self.entries.lock().map_err(|_| {
            Error::store_with_context(
                "memory cache lock poisoned",
                ErrorContext::new().with_source("memory_cache"),
            )
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.peek(key).map(CacheEntry::is_expired) {
            Some(true) => {
                entries.pop(key);
                Ok(false)
            }
            Some(false) => Ok(true),
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.peek(key).map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.lock()?
            .put(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.pop(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Store that keeps nothing: every lookup misses.
pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn exists(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
