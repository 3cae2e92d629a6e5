//! The interestingness aggregator.
//!
//! [`Aggregator::get_listing`] is the single query entry point used by the
//! serving layer. It normalizes the request, serves fresh pages from the
//! cache, and otherwise performs one coalesced upstream fetch per key with a
//! single retry and a stale-cache fallback.

use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::client::UpstreamClient;
use crate::validation::validate_listing;
use crate::{
    AggregatorOptions, CacheEntry, CacheKey, ConfigError, ListingError, ListingRequest,
    ListingResult, Result,
};
use chrono::NaiveDate;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// First day Flickr computed interestingness for.
pub fn first_listing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2004, 7, 1).unwrap_or(NaiveDate::MIN)
}

type SharedFetch = Shared<BoxFuture<'static, Result<ListingResult>>>;

/// Memoized answer of the latest-date lookup.
#[derive(Debug, Clone, Copy)]
struct LatestDate {
    checked_on: NaiveDate,
    date: NaiveDate,
}

struct Inner {
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    options: AggregatorOptions,
    permits: Semaphore,
    inflight: Mutex<HashMap<CacheKey, SharedFetch>>,
    latest: tokio::sync::Mutex<Option<LatestDate>>,
}

/// Cached, coalescing front for an [`UpstreamClient`].
///
/// Cloning is cheap; clones share the cache, the in-flight fetches and the
/// concurrency budget.
///
/// # Examples
///
/// ```rust,no_run
/// # #[cfg(feature = "moka")]
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use interestingness::{Aggregator, FlickrClient, FlickrCredentials, ListingRequest};
/// use chrono::NaiveDate;
/// use std::time::Duration;
///
/// let client = FlickrClient::new(FlickrCredentials::from_env()?, Duration::from_secs(10))?;
/// let aggregator = Aggregator::builder(client).build()?;
///
/// let listing = aggregator
///     .get_listing(&ListingRequest::new().date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).per_page(50))
///     .await?;
/// println!("{} photos, stale = {}", listing.photos.len(), listing.stale);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    /// Start building an aggregator on top of `upstream`
    pub fn builder<U>(upstream: U) -> AggregatorBuilder
    where
        U: UpstreamClient + 'static,
    {
        AggregatorBuilder::new(Arc::new(upstream))
    }

    /// Options in effect
    pub fn options(&self) -> &AggregatorOptions {
        &self.inner.options
    }

    /// Fetch one listing page, from the cache when fresh.
    ///
    /// Returns a result flagged `stale` when the upstream is rate limiting or
    /// unavailable and an expired copy of the page is still retained.
    pub async fn get_listing(&self, request: &ListingRequest) -> Result<ListingResult> {
        let key = self.normalize(request).await?;
        let now = self.inner.clock.now();

        if let Some(entry) = self.inner.cache.get(&key).await {
            if !entry.is_expired(now) {
                debug!(key = %key, "Cache hit");
                return Ok(entry.value);
            }
            if !entry.is_retained(now, self.inner.options.stale_retention) {
                debug!(key = %key, "Evicting entry past its stale retention");
                self.inner.cache.remove(&key).await;
            }
        }

        self.join_or_start(key).await
    }

    /// Merge the top `count` photos of a day across as many pages as needed.
    ///
    /// Pages are fetched through [`get_listing`](Self::get_listing), at most
    /// `max_per_page` photos at a time, so each one is cached and coalesced
    /// on its own.
    /// A photo that drifted across a page boundary is kept at its first rank.
    pub async fn top_photos(&self, date: Option<NaiveDate>, count: u32) -> Result<ListingResult> {
        let max = self.inner.options.max_total_results;
        if count == 0 || count > max {
            return Err(ListingError::invalid_request(format!(
                "count must be between 1 and {max}, got {count}"
            )));
        }

        let date = self.resolve_date(date).await?;
        let per_page = count.min(self.inner.options.max_per_page);
        let wanted = count as usize;

        let mut photos = Vec::with_capacity(wanted);
        let mut seen = HashSet::new();
        let mut stale = false;
        let mut total: u32;
        let mut page = 1;

        loop {
            let request = ListingRequest::new().date(date).page(page).per_page(per_page);
            let listing = self.get_listing(&request).await?;

            stale |= listing.stale;
            total = listing.total;
            let short_page = (listing.photos.len() as u32) < per_page;
            let last_page = page >= listing.pages;

            for photo in listing.photos {
                if seen.insert(photo.id.clone()) {
                    photos.push(photo);
                } else {
                    debug!(photo = %photo.id, page, "Dropping photo repeated across pages");
                }
            }

            let next_start = u64::from(page) * u64::from(per_page);
            if photos.len() >= wanted
                || short_page
                || last_page
                || next_start >= u64::from(max)
            {
                break;
            }
            page += 1;
        }

        photos.truncate(wanted);

        Ok(ListingResult {
            date,
            page: 1,
            pages: 1,
            per_page: count,
            total,
            photos,
            stale,
        })
    }

    /// Mark the cached page for `request` as expired.
    ///
    /// The entry stays available for stale fallback; the next query refreshes it.
    pub async fn soft_purge(&self, request: &ListingRequest) -> Result<()> {
        let key = self.normalize(request).await?;
        if let Some(mut entry) = self.inner.cache.get(&key).await {
            entry.metadata.expire(self.inner.clock.now());
            self.inner.cache.set(&key, entry).await;
            debug!(key = %key, "Soft purged");
        }
        Ok(())
    }

    /// Drop every cached page.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    /// Fill in defaults and reject requests that can never succeed.
    async fn normalize(&self, request: &ListingRequest) -> Result<CacheKey> {
        let options = &self.inner.options;

        let per_page = request.per_page.unwrap_or(options.default_per_page);
        if per_page == 0 {
            return Err(ListingError::invalid_request("per_page must be at least 1"));
        }
        if per_page > options.max_per_page {
            return Err(ListingError::invalid_request(format!(
                "per_page {per_page} exceeds the maximum of {}",
                options.max_per_page
            )));
        }

        let page = request.page.unwrap_or(1);
        if page == 0 {
            return Err(ListingError::invalid_request("page must be at least 1"));
        }
        let first_index = u64::from(page - 1) * u64::from(per_page);
        if first_index >= u64::from(options.max_total_results) {
            return Err(ListingError::invalid_request(format!(
                "page {page} at {per_page} per page is beyond the {} available results",
                options.max_total_results
            )));
        }

        let date = self.resolve_date(request.date).await?;
        Ok(CacheKey::new(date, page, per_page))
    }

    async fn resolve_date(&self, date: Option<NaiveDate>) -> Result<NaiveDate> {
        match date {
            Some(date) => {
                let today = self.inner.clock.today();
                if date > today {
                    return Err(ListingError::invalid_request(format!(
                        "date {date} is in the future"
                    )));
                }
                let first = first_listing_date();
                if date < first {
                    return Err(ListingError::invalid_request(format!(
                        "no listings exist before {first}"
                    )));
                }
                Ok(date)
            }
            None => self.latest_date().await,
        }
    }

    /// Most recent listing date, looked up at most once per UTC day.
    async fn latest_date(&self) -> Result<NaiveDate> {
        let today = self.inner.clock.today();

        // Held across the lookup so concurrent callers share one upstream call
        let mut memo = self.inner.latest.lock().await;
        if let Some(latest) = *memo {
            if latest.checked_on == today {
                return Ok(latest.date);
            }
        }

        let upstream = Arc::clone(&self.inner.upstream);
        match self.inner.guarded(async move { upstream.latest_date().await }).await {
            Ok(date) => {
                debug!(date = %date, "Resolved latest listing date");
                *memo = Some(LatestDate {
                    checked_on: today,
                    date,
                });
                Ok(date)
            }
            Err(err) => match *memo {
                Some(previous) if err.is_retryable() => {
                    warn!(error = %err, date = %previous.date, "Latest date lookup failed, reusing previous answer");
                    Ok(previous.date)
                }
                _ => Err(err),
            },
        }
    }

    /// Join the in-flight fetch for `key`, or start one.
    fn join_or_start(&self, key: CacheKey) -> SharedFetch {
        let mut inflight = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(fetch) = inflight.get(&key) {
            debug!(key = %key, "Joining in-flight fetch");
            return fetch.clone();
        }

        let inner = Arc::clone(&self.inner);
        // Spawned so that callers who stop waiting do not cancel the fetch
        let handle = tokio::spawn(async move {
            let result = inner.refresh(key).await;
            inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            result
        });

        let fetch = async move {
            handle.await.unwrap_or_else(|join_error| {
                Err(ListingError::unavailable(format!(
                    "listing fetch task failed: {join_error}"
                )))
            })
        }
        .boxed()
        .shared();

        inflight.insert(key, fetch.clone());
        fetch
    }
}

impl Inner {
    /// Fetch `key` from upstream and apply the retry and fallback policy.
    async fn refresh(&self, key: CacheKey) -> Result<ListingResult> {
        let outcome = match self.fetch_once(key).await {
            Err(ListingError::UpstreamUnavailable(reason)) => {
                warn!(
                    key = %key,
                    reason = %reason,
                    backoff = ?self.options.retry_backoff,
                    "Upstream unavailable, retrying once"
                );
                tokio::time::sleep(self.options.retry_backoff).await;
                self.fetch_once(key).await
            }
            other => other,
        };

        match outcome {
            Ok(listing) => {
                info!(key = %key, photos = listing.photos.len(), "Fetched listing");
                let entry = CacheEntry::new(listing.clone(), self.clock.now(), self.options.cache_ttl);
                self.cache.set(&key, entry).await;
                Ok(listing)
            }
            Err(err) if err.is_retryable() => self.stale_fallback(key, err).await,
            Err(err) => {
                if let ListingError::UpstreamDataError(detail) = &err {
                    error!(key = %key, detail = %detail, "Upstream data failed validation");
                }
                Err(err)
            }
        }
    }

    async fn fetch_once(&self, key: CacheKey) -> Result<ListingResult> {
        let upstream = Arc::clone(&self.upstream);
        let request = key.to_request();
        let listing = self
            .guarded(async move { upstream.fetch(&request).await })
            .await?;

        if listing.key() != key {
            return Err(ListingError::data(format!(
                "asked for {key}, upstream answered {}",
                listing.key()
            )));
        }
        validate_listing(&listing)?;
        Ok(listing)
    }

    /// Run one upstream call under the concurrency limit and the call timeout.
    async fn guarded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ListingError::unavailable("upstream call limiter closed"))?;

        match tokio::time::timeout(self.options.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ListingError::unavailable(format!(
                "upstream call timed out after {:?}",
                self.options.request_timeout
            ))),
        }
    }

    async fn stale_fallback(&self, key: CacheKey, err: ListingError) -> Result<ListingResult> {
        let now = self.clock.now();
        match self.cache.get(&key).await {
            Some(entry) if entry.is_retained(now, self.options.stale_retention) => {
                warn!(
                    key = %key,
                    error = %err,
                    age = ?entry.age(now),
                    "Serving stale listing"
                );
                Ok(entry.value.into_stale())
            }
            _ => {
                warn!(key = %key, error = %err, retry_after = ?err.retry_after(), "No cached listing to fall back on");
                Err(err)
            }
        }
    }
}

/// Builder for [`Aggregator`].
pub struct AggregatorBuilder {
    upstream: Arc<dyn UpstreamClient>,
    cache: Option<Arc<dyn Cache>>,
    clock: Arc<dyn Clock>,
    options: AggregatorOptions,
}

impl AggregatorBuilder {
    /// Create a builder with default options, the system clock and the default cache
    pub fn new(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            upstream,
            cache: None,
            clock: Arc::new(SystemClock),
            options: AggregatorOptions::default(),
        }
    }

    /// Use these options
    pub fn options(mut self, options: AggregatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an explicit cache instead of the default in-memory one
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use an explicit time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Assemble the aggregator
    pub fn build(self) -> Result<Aggregator, ConfigError> {
        let cache = match self.cache {
            Some(cache) => cache,
            None => default_cache(&self.options)?,
        };

        Ok(Aggregator {
            inner: Arc::new(Inner {
                upstream: self.upstream,
                cache,
                clock: self.clock,
                permits: Semaphore::new(self.options.max_concurrent_fetches),
                options: self.options,
                inflight: Mutex::new(HashMap::new()),
                latest: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

#[cfg(feature = "moka")]
fn default_cache(options: &AggregatorOptions) -> Result<Arc<dyn Cache>, ConfigError> {
    let time_to_live = options.cache_ttl.saturating_add(options.stale_retention);
    Ok(Arc::new(crate::MokaCache::with_time_to_live(
        options.cache_capacity,
        time_to_live,
    )))
}

#[cfg(not(feature = "moka"))]
fn default_cache(_options: &AggregatorOptions) -> Result<Arc<dyn Cache>, ConfigError> {
    Err(ConfigError::invalid_option(
        "no cache configured; enable the `moka` feature or pass one to AggregatorBuilder::cache",
    ))
}
