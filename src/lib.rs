#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # interestingness
//!
//! Fetches Flickr's daily interestingness rankings, caches them in memory and
//! serves them to an HTTP layer with predictable failure behaviour.
//!
//! The crate has two layers:
//!
//! - [`UpstreamClient`] performs one round trip to the photo API.
//!   [`FlickrClient`] is the `reqwest` implementation.
//! - [`Aggregator`] sits in front of it. Fresh pages come from the cache.
//!   Concurrent requests for the same page share one upstream call. An
//!   unavailable upstream is retried once. A throttled or unreachable
//!   upstream falls back to an expired copy flagged `stale`.
//!
//! ## Features
//!
//! - `moka` (default): Moka-backed in-memory cache used when no cache is supplied
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "moka")]
//! use interestingness::{Aggregator, AggregatorOptions, FlickrClient, FlickrCredentials, ListingRequest};
//! use std::time::Duration;
//!
//! # #[cfg(feature = "moka")]
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AggregatorOptions::builder()
//!         .cache_ttl(Duration::from_secs(3600))
//!         .max_concurrent_fetches(2)
//!         .build()?;
//!
//!     let client = FlickrClient::new(FlickrCredentials::from_env()?, options.request_timeout)?;
//!     let aggregator = Aggregator::builder(client).options(options).build()?;
//!
//!     // Most recent day, first page of 50
//!     let listing = aggregator.get_listing(&ListingRequest::new().per_page(50)).await?;
//!     for photo in &listing.photos {
//!         println!("#{} {} {}", photo.rank, photo.title, photo.page_url());
//!     }
//!     Ok(())
//! }
//! # #[cfg(not(feature = "moka"))]
//! # fn main() {}
//! ```

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod clock;
pub mod error;
pub mod metadata;
pub mod model;
pub mod options;
pub mod validation;

pub use aggregator::{Aggregator, AggregatorBuilder};
pub use cache::Cache;
#[cfg(feature = "moka")]
pub use cache::MokaCache;
pub use client::{FlickrClient, FlickrCredentials, UpstreamClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, Fault, ListingError, Result};
pub use metadata::{CacheEntry, CacheMetadata};
pub use model::{CacheKey, ListingRequest, ListingResult, PhotoRecord, PhotoSize};
pub use options::{AggregatorOptions, AggregatorOptionsBuilder};
pub use validation::CheckValue;
