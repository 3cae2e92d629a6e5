//! Scripted upstream and helpers shared by the aggregator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use interestingness::{
    Aggregator, AggregatorBuilder, AggregatorOptions, ListingError, ListingRequest,
    ListingResult, ManualClock, PhotoRecord, Result, UpstreamClient,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TTL: Duration = Duration::from_secs(60 * 60);

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Upstream that answers from a script of failures, then succeeds.
///
/// Every successful answer carries the fetch number in its titles so tests
/// can tell a refreshed page from a cached one.
pub struct MockUpstream {
    pub fetches: AtomicUsize,
    pub lookups: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    script: Mutex<VecDeque<ListingError>>,
    pub delay: Mutex<Duration>,
    pub latest: NaiveDate,
    pub duplicate_ranks: Mutex<bool>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            latest: day(2024, 1, 1),
            duplicate_ranks: Mutex::new(false),
        })
    }

    /// Queue failures returned by the next fetches, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ListingError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn listing(&self, request: &ListingRequest, generation: usize) -> ListingResult {
        let date = request.date.unwrap_or(self.latest);
        let page = request.page.unwrap_or(1);
        let per_page = request.per_page.unwrap_or(100);
        let total: u32 = 500;
        let duplicate = *self.duplicate_ranks.lock().unwrap();

        let start = (page - 1) * per_page;
        let count = per_page.min(total.saturating_sub(start));
        let photos = (0..count)
            .map(|i| {
                let rank = if duplicate { start + 1 } else { start + i + 1 };
                PhotoRecord {
                    id: format!("{date}-{}", start + i + 1),
                    title: format!("fetch {generation}"),
                    owner: "12345678@N00".to_string(),
                    owner_name: Some("Owner".to_string()),
                    secret: "cafebabe".to_string(),
                    server: "65535".to_string(),
                    rank,
                    taken: None,
                    uploaded: None,
                }
            })
            .collect();

        ListingResult {
            date,
            page,
            pages: total.div_ceil(per_page),
            per_page,
            total,
            photos,
            stale: false,
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn latest_date(&self) -> Result<NaiveDate> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.latest)
    }

    async fn fetch(&self, request: &ListingRequest) -> Result<ListingResult> {
        let generation = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => Ok(self.listing(request, generation)),
        }
    }
}

pub fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap())
}

pub fn options() -> AggregatorOptions {
    AggregatorOptions::builder()
        .cache_ttl(TTL)
        .stale_retention(Duration::from_secs(24 * 60 * 60))
        .retry_backoff(Duration::from_millis(5))
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn aggregator_with(
    upstream: &Arc<MockUpstream>,
    clock: &ManualClock,
    options: AggregatorOptions,
) -> Aggregator {
    AggregatorBuilder::new(upstream.clone())
        .clock(Arc::new(clock.clone()))
        .options(options)
        .build()
        .unwrap()
}

pub fn setup() -> (Aggregator, Arc<MockUpstream>, ManualClock) {
    let upstream = MockUpstream::new();
    let clock = clock();
    let aggregator = aggregator_with(&upstream, &clock, options());
    (aggregator, upstream, clock)
}

pub fn new_year_request() -> ListingRequest {
    ListingRequest::new().date(day(2024, 1, 1)).page(1).per_page(50)
}
