//! Upstream photo API client.
//!
//! [`UpstreamClient`] is the seam between the aggregator and the network.
//! [`FlickrClient`] implements it against the Flickr REST API
//! (`flickr.interestingness.getList`) with `reqwest`.

use crate::clock::{Clock, SystemClock};
use crate::validation::validate_listing;
use crate::{ConfigError, ListingError, ListingRequest, ListingResult, PhotoRecord, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default Flickr REST endpoint.
pub const FLICKR_ENDPOINT: &str = "https://api.flickr.com/services/rest/";

const LIST_METHOD: &str = "flickr.interestingness.getList";
const EXTRAS: &str = "owner_name,date_taken,date_upload";

/// Flickr error code for "Service currently unavailable".
const CODE_SERVICE_UNAVAILABLE: u32 = 105;
/// Flickr error code for an unusable date, also returned for days not yet ranked.
const CODE_INVALID_DATE: u32 = 1;

/// How many days back `latest_date` probes before giving up.
const LATEST_DATE_PROBES: u64 = 3;

/// One network round trip to the photo API.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Most recent day for which a ranked listing is available.
    async fn latest_date(&self) -> Result<NaiveDate>;

    /// Fetch one listing page.
    ///
    /// A request without a date is first resolved through [`latest_date`](Self::latest_date).
    /// Missing page fields default to page 1 and 100 photos.
    async fn fetch(&self, request: &ListingRequest) -> Result<ListingResult>;
}

/// API credentials for Flickr.
#[derive(Clone)]
pub struct FlickrCredentials {
    api_key: String,
}

impl FlickrCredentials {
    /// Wrap an API key
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("Flickr API key is empty".to_string()));
        }
        Ok(Self { api_key })
    }

    /// Read the key from `FLICKR_API_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the key through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FLICKR_API_KEY").ok_or_else(|| {
            ConfigError::MissingCredential(
                "FLICKR_API_KEY is not set; get a key at https://www.flickr.com/services/apps/create/"
                    .to_string(),
            )
        })?;
        Self::new(api_key)
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for FlickrCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlickrCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Flickr REST client for interestingness listings.
#[derive(Clone)]
pub struct FlickrClient {
    endpoint: String,
    credentials: FlickrCredentials,
    http_client: Client,
    clock: Arc<dyn Clock>,
}

impl FlickrClient {
    /// Create a client for the public Flickr endpoint.
    pub fn new(credentials: FlickrCredentials, timeout: Duration) -> Result<Self, ConfigError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("interestingness/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self::with_http_client(FLICKR_ENDPOINT, credentials, http_client))
    }

    /// Create a client with a pre-built `reqwest::Client` and endpoint (for testing).
    pub fn with_http_client(
        endpoint: impl Into<String>,
        credentials: FlickrCredentials,
        http_client: Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
            http_client,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to decide what "yesterday" is when probing for the latest date.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request_page(&self, date: NaiveDate, page: u32, per_page: u32) -> Result<Envelope> {
        let date = date.format("%Y-%m-%d").to_string();
        let page_param = page.to_string();
        let per_page_param = per_page.to_string();

        debug!(date = %date, page, per_page, "Requesting interestingness page");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("method", LIST_METHOD),
                ("api_key", self.credentials.api_key()),
                ("date", date.as_str()),
                ("page", page_param.as_str()),
                ("per_page", per_page_param.as_str()),
                ("extras", EXTRAS),
                ("format", "json"),
                ("nojsoncallback", "1"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_for_status(response).await);
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn error_for_status(&self, response: reqwest::Response) -> ListingError {
        let status = response.status();

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, self.clock.now()));

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(retry_after = ?retry_after, "Flickr rate limited");
                ListingError::rate_limited(retry_after)
            }
            s if s.is_server_error() => ListingError::unavailable(format!("HTTP {s}: {body}")),
            s => ListingError::rejected(format!("HTTP {s}: {body}")),
        }
    }
}

/// `Retry-After` is either delay-seconds or an HTTP-date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    // A date already in the past means "retry now"
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[async_trait]
impl UpstreamClient for FlickrClient {
    async fn latest_date(&self) -> Result<NaiveDate> {
        let today = self.clock.today();

        for back in 1..=LATEST_DATE_PROBES {
            let Some(date) = today.checked_sub_days(Days::new(back)) else {
                break;
            };
            let envelope = self.request_page(date, 1, 1).await?;
            if envelope.is_failure(CODE_INVALID_DATE) {
                debug!(date = %date, "Date not ranked yet");
                continue;
            }
            if envelope.into_page()?.photo.is_empty() {
                debug!(date = %date, "No listing yet for date");
                continue;
            }
            return Ok(date);
        }

        Err(ListingError::rejected(format!(
            "no interestingness listing available in the {LATEST_DATE_PROBES} days before {today}"
        )))
    }

    async fn fetch(&self, request: &ListingRequest) -> Result<ListingResult> {
        let date = match request.date {
            Some(date) => date,
            None => self.latest_date().await?,
        };
        let page = request.page.unwrap_or(1);
        let per_page = request.per_page.unwrap_or(100);

        let wire = self.request_page(date, page, per_page).await?.into_page()?;

        let returned_page = wire.page.get("page")?;
        if returned_page != page {
            // Flickr answers out-of-range pages with the last page
            return Err(ListingError::rejected(format!(
                "page {page} is out of range ({} pages available)",
                wire.pages.get("pages")?
            )));
        }

        let result = wire.into_listing(date, page, per_page)?;
        validate_listing(&result)?;
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    stat: String,
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    photos: Option<PhotoPage>,
}

impl Envelope {
    fn is_failure(&self, code: u32) -> bool {
        self.stat == "fail" && self.code == Some(code)
    }

    fn into_page(self) -> Result<PhotoPage> {
        match self.stat.as_str() {
            "ok" => self
                .photos
                .ok_or_else(|| ListingError::data("response has no photos element")),
            "fail" => {
                let code = self.code.unwrap_or_default();
                let message = self.message.unwrap_or_else(|| "unknown error".to_string());
                if code == CODE_SERVICE_UNAVAILABLE {
                    Err(ListingError::unavailable(format!("Flickr error {code}: {message}")))
                } else {
                    Err(ListingError::rejected(format!("Flickr error {code}: {message}")))
                }
            }
            other => Err(ListingError::data(format!("unexpected stat '{other}'"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PhotoPage {
    page: Lenient,
    pages: Lenient,
    total: Lenient,
    #[serde(default)]
    photo: Vec<WirePhoto>,
}

#[derive(Debug, Deserialize)]
struct WirePhoto {
    id: String,
    owner: String,
    secret: String,
    server: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    ownername: Option<String>,
    #[serde(default)]
    datetaken: Option<String>,
    #[serde(default)]
    dateupload: Option<String>,
}

/// Flickr sends counters as numbers or as numeric strings depending on the field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(u64),
    Text(String),
}

impl Lenient {
    fn get(&self, field: &str) -> Result<u32> {
        let parsed = match self {
            Lenient::Number(n) => u32::try_from(*n).ok(),
            Lenient::Text(s) => s.trim().parse().ok(),
        };
        parsed.ok_or_else(|| ListingError::data(format!("'{field}' is not a page counter: {self:?}")))
    }
}

impl PhotoPage {
    fn into_listing(self, date: NaiveDate, page: u32, per_page: u32) -> Result<ListingResult> {
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let photos = self
            .photo
            .into_iter()
            .enumerate()
            .map(|(position, wire)| {
                let position = u32::try_from(position)
                    .map_err(|_| ListingError::data("page has too many photos"))?;
                Ok(wire.into_record(offset.saturating_add(position + 1)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ListingResult {
            date,
            page,
            pages: self.pages.get("pages")?,
            per_page,
            total: self.total.get("total")?,
            photos,
            stale: false,
        })
    }
}

impl WirePhoto {
    fn into_record(self, rank: u32) -> PhotoRecord {
        let taken = self
            .datetaken
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok());
        let uploaded = self
            .dateupload
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        PhotoRecord {
            id: self.id,
            title: self.title,
            owner: self.owner,
            owner_name: self.ownername.filter(|name| !name.is_empty()),
            secret: self.secret,
            server: self.server,
            rank,
            taken,
            uploaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_key() {
        let credentials = FlickrCredentials::new("super-secret").unwrap();
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_credentials_from_lookup() {
        let credentials =
            FlickrCredentials::from_lookup(|name| (name == "FLICKR_API_KEY").then(|| "k".into()))
                .unwrap();
        assert_eq!(credentials.api_key(), "k");

        assert!(FlickrCredentials::from_lookup(|_| None).is_err());
        assert!(FlickrCredentials::from_lookup(|_| Some("  ".into())).is_err());
    }

    #[test]
    fn test_retry_after_forms() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_lenient_counters() {
        let page: PhotoPage = serde_json::from_str(
            r#"{"page":2,"pages":"10","perpage":50,"total":"500","photo":[]}"#,
        )
        .unwrap();
        assert_eq!(page.page.get("page").unwrap(), 2);
        assert_eq!(page.pages.get("pages").unwrap(), 10);
        assert_eq!(page.total.get("total").unwrap(), 500);
    }

    #[test]
    fn test_unreadable_counters_are_data_errors() {
        let page: PhotoPage = serde_json::from_str(
            r#"{"page":"abc","pages":4294967296,"total":" 7 ","photo":[]}"#,
        )
        .unwrap();
        assert!(matches!(page.page.get("page"), Err(ListingError::UpstreamDataError(_))));
        assert!(matches!(page.pages.get("pages"), Err(ListingError::UpstreamDataError(_))));
        assert_eq!(page.total.get("total").unwrap(), 7);
    }

    #[test]
    fn test_ranks_continue_across_pages() {
        let page: PhotoPage = serde_json::from_str(
            r#"{"page":3,"pages":10,"total":500,"photo":[
                {"id":"1","owner":"o@N00","secret":"s","server":"1","title":"a",
                 "datetaken":"2024-01-01 08:30:00","dateupload":"1704100000","ownername":"Ann"},
                {"id":"2","owner":"o@N00","secret":"s","server":"1","title":"b"}
            ]}"#,
        )
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let listing = page.into_listing(date, 3, 50).unwrap();

        assert_eq!(listing.photos[0].rank, 101);
        assert_eq!(listing.photos[1].rank, 102);
        assert_eq!(listing.photos[0].owner_name.as_deref(), Some("Ann"));
        assert_eq!(
            listing.photos[0].taken,
            NaiveDateTime::parse_from_str("2024-01-01 08:30:00", "%Y-%m-%d %H:%M:%S").ok()
        );
        assert_eq!(
            listing.photos[0].uploaded.map(|t| t.timestamp()),
            Some(1_704_100_000)
        );
        assert_eq!(listing.photos[1].taken, None);
    }
}
