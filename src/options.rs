//! Configuration options for the aggregator
//!
//! This module provides the `AggregatorOptions` struct that configures
//! caching, pagination bounds, retry and concurrency behaviour.

use crate::ConfigError;
use std::time::Duration;

/// Largest page Flickr serves for interestingness listings.
pub const FLICKR_MAX_PER_PAGE: u32 = 500;

/// Flickr only ranks the top 500 photos of a day.
pub const FLICKR_MAX_TOTAL_RESULTS: u32 = 500;

/// Configuration options for the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// How long a fetched page counts as fresh
    pub cache_ttl: Duration,

    /// How long past its TTL a page is kept for stale fallback
    pub stale_retention: Duration,

    /// Largest page size a caller may ask for
    pub max_per_page: u32,

    /// Page size used when the request does not specify one
    pub default_per_page: u32,

    /// Upper bound on `(page - 1) * per_page`
    pub max_total_results: u32,

    /// Global cap on concurrent upstream calls, across all keys
    pub max_concurrent_fetches: usize,

    /// Deadline for a single upstream call
    pub request_timeout: Duration,

    /// Fixed wait before the single retry of an unavailable upstream
    pub retry_backoff: Duration,

    /// Maximum number of pages held by the default in-memory cache
    pub cache_capacity: u64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60 * 60),
            stale_retention: Duration::from_secs(24 * 60 * 60),
            max_per_page: FLICKR_MAX_PER_PAGE,
            default_per_page: 100,
            max_total_results: FLICKR_MAX_TOTAL_RESULTS,
            max_concurrent_fetches: 4,
            request_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
            cache_capacity: 1024,
        }
    }
}

impl AggregatorOptions {
    /// Start building options from the defaults
    pub fn builder() -> AggregatorOptionsBuilder {
        AggregatorOptionsBuilder::new()
    }
}

/// Builder for `AggregatorOptions` to make construction more ergonomic
#[derive(Debug, Clone, Default)]
pub struct AggregatorOptionsBuilder {
    options: AggregatorOptions,
}

impl AggregatorOptionsBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for cached pages
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = ttl;
        self
    }

    /// Set how long expired pages are kept for stale fallback
    pub fn stale_retention(mut self, retention: Duration) -> Self {
        self.options.stale_retention = retention;
        self
    }

    /// Set the largest accepted page size
    pub fn max_per_page(mut self, max: u32) -> Self {
        self.options.max_per_page = max;
        self
    }

    /// Set the page size used when the request has none
    pub fn default_per_page(mut self, per_page: u32) -> Self {
        self.options.default_per_page = per_page;
        self
    }

    /// Set the total-results bound pages must stay within
    pub fn max_total_results(mut self, max: u32) -> Self {
        self.options.max_total_results = max;
        self
    }

    /// Set the cap on concurrent upstream calls
    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.options.max_concurrent_fetches = max;
        self
    }

    /// Set the per-call upstream deadline
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    /// Set the backoff before retrying an unavailable upstream
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.options.retry_backoff = backoff;
        self
    }

    /// Set the capacity of the default in-memory cache
    pub fn cache_capacity(mut self, capacity: u64) -> Self {
        self.options.cache_capacity = capacity;
        self
    }

    /// Validate and build the final `AggregatorOptions`
    pub fn build(self) -> Result<AggregatorOptions, ConfigError> {
        let options = self.options;

        if options.cache_ttl.is_zero() {
            return Err(ConfigError::invalid_option("cache_ttl must be positive"));
        }
        if options.request_timeout.is_zero() {
            return Err(ConfigError::invalid_option("request_timeout must be positive"));
        }
        if options.max_concurrent_fetches == 0 {
            return Err(ConfigError::invalid_option(
                "max_concurrent_fetches must be at least 1",
            ));
        }
        if options.cache_capacity == 0 {
            return Err(ConfigError::invalid_option("cache_capacity must be at least 1"));
        }
        if options.max_per_page == 0 || options.max_per_page > FLICKR_MAX_PER_PAGE {
            return Err(ConfigError::invalid_option(format!(
                "max_per_page must be between 1 and {FLICKR_MAX_PER_PAGE}"
            )));
        }
        if options.default_per_page == 0 || options.default_per_page > options.max_per_page {
            return Err(ConfigError::invalid_option(format!(
                "default_per_page must be between 1 and max_per_page ({})",
                options.max_per_page
            )));
        }
        if options.max_total_results == 0 {
            return Err(ConfigError::invalid_option(
                "max_total_results must be at least 1",
            ));
        }

        Ok(options)
    }
}
