//! Key/value caching for retrieval results and re-rank scores.
//!
//! Backends implement [`Cache`]; [`create_cache`] picks one from configuration.
//! Writes off the request path go through [`CacheWriter`].

pub mod memory;
pub mod null;
pub mod writer;

pub use memory::MemoryCache;
pub use null::NullCache;
pub use writer::CacheWriter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheError;

/// An async key/value store with per-entry TTL.
///
/// Values are opaque strings; callers serialize with `serde_json`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// `Ok(None)` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value. `ttl = None` uses the backend's default TTL.
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<bool, CacheError>;

    async fn stats(&self) -> CacheStats;

    /// Release backend resources. Further operations may fail with [`CacheError::Closed`].
    async fn close(&self) -> Result<(), CacheError>;
}

/// Counters reported by a cache backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Build the configured backend.
pub fn create_cache(config: &CacheConfig) -> Arc<dyn Cache> {
    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.max_size, config.default_ttl())),
        CacheBackend::Null => Arc::new(NullCache::new()),
    }
}
