//! Background cache writes off the request path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::Cache;

/// Submits cache writes as tracked tasks.
///
/// At most `max_concurrency` writes exist at once, queued or running. A write
/// submitted while all slots are taken is dropped and counted. Failures are
/// logged and never reach the caller that submitted the write.
#[derive(Clone)]
pub struct CacheWriter {
    cache: Arc<dyn Cache>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("pending", &self.tracker.len())
            .field("available_permits", &self.permits.available_permits())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl CacheWriter {
    pub fn new(cache: Arc<dyn Cache>, max_concurrency: usize) -> Self {
        Self {
            cache,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Spawn a write, or drop it when every slot is busy. Awaiting the handle
    /// is optional.
    pub fn submit(
        &self,
        key: String,
        value: String,
        ttl: Option<Duration>,
    ) -> Option<JoinHandle<()>> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(key = %key, dropped, "Cache writer saturated, dropping write");
            return None;
        };

        let cache = Arc::clone(&self.cache);
        Some(self.tracker.spawn(async move {
            match cache.set(&key, value, ttl).await {
                Ok(_) => debug!(key = %key, "Cache write completed"),
                Err(e) => warn!(key = %key, error = %e, "Cache write failed"),
            }
            drop(permit);
        }))
    }

    /// Number of writes not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Writes dropped because the writer was saturated.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for every write submitted so far.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, MemoryCache};
    use crate::error::CacheError;
    use async_trait::async_trait;

    struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        async fn set(
            &self,
            _key: &str,
            _value: String,
            _ttl: Option<Duration>,
        ) -> Result<bool, CacheError> {
            Err(CacheError::Backend {
                message: "disk full".into(),
            })
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
            CacheStats::default()
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    /// Holds every `set` until released.
    struct StallingCache {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Cache for StallingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        async fn set(
            &self,
            _key: &str,
            _value: String,
            _ttl: Option<Duration>,
        ) -> Result<bool, CacheError> {
            self.release.notified().await;
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
            CacheStats::default()
        }
        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submitted_write_lands() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(8, Duration::from_secs(60)));
        let writer = CacheWriter::new(Arc::clone(&cache), 2);
        writer
            .submit("k".into(), "v".into(), None)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_flush_waits_for_all_writes() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(64, Duration::from_secs(60)));
        let writer = CacheWriter::new(Arc::clone(&cache), 16);
        for i in 0..10 {
            let handle = writer.submit(format!("k{i}"), i.to_string(), None);
            assert!(handle.is_some());
        }
        writer.flush().await;
        assert_eq!(writer.pending(), 0);
        assert_eq!(cache.stats().await.entries, 10);

        // Still usable after a flush.
        writer
            .submit("late".into(), "x".into(), None)
            .unwrap()
            .await
            .unwrap();
        assert!(cache.exists("late").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_write_is_swallowed() {
        let writer = CacheWriter::new(Arc::new(FailingCache), 4);
        let handle = writer.submit("k".into(), "v".into(), None).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_saturated_writer_drops_and_counts() {
        let cache = Arc::new(StallingCache {
            release: tokio::sync::Notify::new(),
        });
        let writer = CacheWriter::new(Arc::clone(&cache) as Arc<dyn Cache>, 1);

        let first = writer.submit("a".into(), "1".into(), None).unwrap();
        assert!(writer.submit("b".into(), "2".into(), None).is_none());
        assert!(writer.submit("c".into(), "3".into(), None).is_none());
        assert_eq!(writer.dropped(), 2);
        assert_eq!(writer.pending(), 1);

        cache.release.notify_one();
        first.await.unwrap();
        assert!(writer.submit("d".into(), "4".into(), None).is_some());
        assert_eq!(writer.dropped(), 2);
    }
}
