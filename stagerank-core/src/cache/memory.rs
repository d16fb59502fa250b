//! In-process LRU cache with per-entry expiry.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::debug;

use super::{Cache, CacheStats};
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
    expired: u64,
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<String, Entry>,
    counters: Counters,
}

/// Bounded LRU cache. Expired entries are dropped lazily on access.
///
/// A zero TTL stores an entry that is already expired.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                counters: Counters::default(),
            }),
            default_ttl,
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        self.inner.lock().map_err(|_| CacheError::Poisoned)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let lookup = inner
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));

        match lookup {
            Some((false, value)) => {
                inner.counters.hits += 1;
                Ok(Some(value))
            }
            Some((true, _)) => {
                inner.entries.pop(key);
                inner.counters.expired += 1;
                inner.counters.misses += 1;
                Ok(None)
            }
            None => {
                inner.counters.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        if let Some((evicted, _)) = inner.entries.push(key.to_string(), entry) {
            if evicted != key {
                inner.counters.evictions += 1;
                debug!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
        inner.counters.sets += 1;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        let removed = inner.entries.pop(key).is_some();
        if removed {
            inner.counters.deletes += 1;
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        match inner.entries.peek(key).map(|e| e.is_expired(now)) {
            Some(false) => Ok(true),
            Some(true) => {
                inner.entries.pop(key);
                inner.counters.expired += 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        Ok(true)
    }

    async fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats {
                backend: "memory".into(),
                ..Default::default()
            };
        };
        CacheStats {
            backend: "memory".into(),
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            sets: inner.counters.sets,
            deletes: inner.counters.deletes,
            evictions: inner.counters.evictions,
            expired: inner.counters.expired,
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
