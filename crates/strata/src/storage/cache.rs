//! Warm tier: distributed key/value cache with per-key TTL
//!
//! The engine treats the cache as an unreliable network service. Any error
//! is surfaced as [`StrataError::CacheUnavailable`] and the caller falls back
//! to the durable store.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;

/// Default key capacity for [`InMemoryCache`]
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Key/value store used as the warm tier
#[async_trait]
pub trait DistributedCacheClient: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl_secs`
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;

    /// Remove a key; deleting an absent key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug)]
struct CacheEntry {
    value: Vec<u8>,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local warm tier backed by an LRU with lazy TTL expiry
///
/// Useful for single-node deployments and tests. When the key capacity is
/// reached the least recently used key is dropped, which the engine treats
/// like any other cache miss.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[async_trait]
impl DistributedCacheClient for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(Duration::from_secs(ttl_secs)),
        };
        self.entries.lock().put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().pop(key);
        Ok(())
    }
}
