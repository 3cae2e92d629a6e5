//! Listing data model: photos, requests, results and cache keys.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Photo sizes addressable on the static media host.
///
/// Suffixes follow Flickr's URL scheme; `Medium` has no suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoSize {
    /// 75x75 square
    Square,
    /// 100 on the longest side
    Thumbnail,
    /// 240 on the longest side
    Small,
    /// 500 on the longest side
    Medium,
    /// 1024 on the longest side
    Large,
}

impl PhotoSize {
    fn suffix(self) -> &'static str {
        match self {
            PhotoSize::Square => "_s",
            PhotoSize::Thumbnail => "_t",
            PhotoSize::Small => "_m",
            PhotoSize::Medium => "",
            PhotoSize::Large => "_b",
        }
    }
}

/// One photo from an interestingness listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Photo identifier, unique within a listing date
    pub id: String,
    /// Title as entered by the owner (may be empty)
    pub title: String,
    /// Owner NSID
    pub owner: String,
    /// Owner display name, when the upstream sent it
    pub owner_name: Option<String>,
    /// Token needed to build media URLs
    pub secret: String,
    /// Server shard hosting the media
    pub server: String,
    /// 1-based interestingness rank for the listing date
    pub rank: u32,
    /// Capture time as reported by the camera/owner
    pub taken: Option<NaiveDateTime>,
    /// Upload time
    pub uploaded: Option<DateTime<Utc>>,
}

impl PhotoRecord {
    /// Static media URL for this photo at the given size.
    pub fn media_url(&self, size: PhotoSize) -> String {
        format!(
            "https://live.staticflickr.com/{}/{}_{}{}.jpg",
            self.server,
            self.id,
            self.secret,
            size.suffix()
        )
    }

    /// Page URL of the photo on flickr.com.
    pub fn page_url(&self) -> String {
        format!("https://www.flickr.com/photos/{}/{}", self.owner, self.id)
    }
}

/// A listing query as received from the serving layer.
///
/// Missing fields are filled in by the aggregator: the most recent available
/// date, page 1, and the configured default page size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRequest {
    /// Listing day; `None` means the most recent available
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// 1-based page number
    #[serde(default)]
    pub page: Option<u32>,
    /// Photos per page
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl ListingRequest {
    /// Request with every field defaulted
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listing day
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the page number
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Set the page size
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }
}

/// One page of an interestingness listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResult {
    /// The concrete day this listing belongs to
    pub date: NaiveDate,
    /// Page number of this result
    pub page: u32,
    /// Total number of pages available at this page size
    pub pages: u32,
    /// Page size used
    pub per_page: u32,
    /// Total number of photos available for the day
    pub total: u32,
    /// Photos, rank ascending
    pub photos: Vec<PhotoRecord>,
    /// Served from an expired cache entry because the upstream could not be reached
    #[serde(default)]
    pub stale: bool,
}

impl ListingResult {
    /// Cache key this result is stored under
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.date, self.page, self.per_page)
    }

    /// The same result flagged as degraded
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

/// Normalized `(date, page, per_page)` identity of a listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Listing day
    pub date: NaiveDate,
    /// 1-based page number
    pub page: u32,
    /// Photos per page
    pub per_page: u32,
}

impl CacheKey {
    /// Create a key
    pub fn new(date: NaiveDate, page: u32, per_page: u32) -> Self {
        Self {
            date,
            page,
            per_page,
        }
    }

    /// Fully specified request for this key
    pub fn to_request(self) -> ListingRequest {
        ListingRequest {
            date: Some(self.date),
            page: Some(self.page),
            per_page: Some(self.per_page),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.date, self.page, self.per_page)
    }
}
