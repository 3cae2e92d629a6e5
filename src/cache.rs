//! Cache trait and implementations
//!
//! The aggregator keeps listing pages in a [`Cache`]. The default
//! implementation is [`MokaCache`], an in-memory concurrent cache; nothing is
//! persisted across restarts.

use crate::{CacheEntry, CacheKey};
use async_trait::async_trait;

#[cfg(feature = "moka")]
use moka::future::Cache as MokaFutureCache;
#[cfg(feature = "moka")]
use std::sync::Arc;
#[cfg(feature = "moka")]
use std::time::Duration;

/// Storage for listing pages keyed by [`CacheKey`].
///
/// Implementations only store and return entries; freshness and stale
/// fallback decisions are made by the aggregator from the entry metadata.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a cache entry by key
    ///
    /// Returns the entry regardless of its age.
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Insert or overwrite the entry for `key`
    async fn set(&self, key: &CacheKey, entry: CacheEntry);

    /// Remove a cache entry by key
    async fn remove(&self, key: &CacheKey);

    /// Clear all cache entries
    async fn clear(&self);

    /// Get the current number of entries in the cache
    async fn len(&self) -> usize;

    /// Check if the cache is empty
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Moka-based cache implementation
///
/// Bounded by entry count. An optional hard time-to-live drops entries that
/// are too old to serve even as stale fallbacks.
///
/// # Examples
///
/// ```rust
/// # #[cfg(feature = "moka")]
/// use interestingness::MokaCache;
///
/// # #[cfg(feature = "moka")]
/// let cache = MokaCache::new(1000);
/// ```
#[cfg(feature = "moka")]
#[derive(Clone)]
pub struct MokaCache {
    inner: Arc<MokaFutureCache<CacheKey, CacheEntry>>,
}

#[cfg(feature = "moka")]
impl MokaCache {
    /// Create a new MokaCache with the specified maximum capacity
    pub fn new(max_capacity: u64) -> Self {
        let inner = MokaFutureCache::builder().max_capacity(max_capacity).build();

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a MokaCache whose entries are dropped `time_to_live` after insertion
    pub fn with_time_to_live(max_capacity: u64, time_to_live: Duration) -> Self {
        let inner = MokaFutureCache::builder()
            .max_capacity(max_capacity)
            .time_to_live(time_to_live)
            .build();

        Self {
            inner: Arc::new(inner),
        }
    }
}

#[cfg(feature = "moka")]
#[async_trait]
impl Cache for MokaCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) {
        self.inner.insert(*key, entry).await;
    }

    async fn remove(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }

    async fn clear(&self) {
        self.inner.invalidate_all();
    }

    async fn len(&self) -> usize {
        // entry_count lags behind until pending maintenance has run
        self.inner.run_pending_tasks().await;
        self.inner.entry_count() as usize
    }
}
