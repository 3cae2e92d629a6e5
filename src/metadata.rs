//! Cache metadata and entry structures.

use crate::ListingResult;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Metadata associated with a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadata {
    /// When the listing was fetched from the upstream
    pub fetched_at: DateTime<Utc>,
    /// How long the listing counts as fresh
    pub ttl: Duration,
}

impl CacheMetadata {
    /// Create cache metadata for a listing fetched at `fetched_at`
    pub fn new(fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self { fetched_at, ttl }
    }

    /// Check if this cache entry is expired at the given time
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.ttl
    }

    /// Get the expiration time for this cache entry
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + self.ttl_delta()
    }

    /// Get the age of this cache entry at the given time.
    ///
    /// A fetch time in the future (clock moved backwards) counts as age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Rewind the fetch time so the entry has just expired at `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        if !self.is_expired(now) {
            self.fetched_at = now - self.ttl_delta();
        }
    }

    fn ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// A cached listing page with its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached listing
    pub value: ListingResult,
    /// Metadata about the cache entry
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(value: ListingResult, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            metadata: CacheMetadata::new(fetched_at, ttl),
        }
    }

    /// Check if this cache entry is expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.metadata.is_expired(now)
    }

    /// Whether the entry is still worth keeping as a stale fallback.
    pub fn is_retained(&self, now: DateTime<Utc>, stale_retention: Duration) -> bool {
        self.age(now) < self.metadata.ttl.saturating_add(stale_retention)
    }

    /// Get the age of this cache entry
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        self.metadata.age(now)
    }
}
