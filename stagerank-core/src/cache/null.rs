//! A cache that stores nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Cache, CacheStats};
use crate::error::CacheError;

/// Every read misses; every write reports success.
#[derive(Debug, Default)]
pub struct NullCache {
    misses: AtomicU64,
    sets: AtomicU64,
}

impl NullCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<bool, CacheError> {
        Ok(true)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            backend: "null".into(),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
