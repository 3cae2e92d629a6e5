//! Error types for listing operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for listing operations.
pub type Result<T, E = ListingError> = std::result::Result<T, E>;

/// Errors surfaced by the upstream client and the aggregator.
///
/// Every variant is `Clone` so that all callers coalesced onto one upstream
/// fetch observe the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    /// The caller asked for something that can never succeed (bad page, oversized page, future date)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream refused the request; retrying the same request will not help
    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// The upstream answered with data that violates listing invariants
    #[error("Upstream returned inconsistent data: {0}")]
    UpstreamDataError(String),

    /// The upstream is throttling us
    #[error("Upstream rate limited (retry after {retry_after:?})")]
    UpstreamRateLimited {
        /// Suggested wait before the next attempt, when the upstream sent one
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout, or upstream outage
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Coarse classification of a [`ListingError`] for the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The client sent a bad request
    Client,
    /// The upstream failed in a way retrying will not fix
    Upstream,
    /// Temporary condition; the client may retry later
    Retryable,
}

impl ListingError {
    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        ListingError::InvalidRequest(msg.into())
    }

    /// Create a new upstream rejection error
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        ListingError::UpstreamRejected(msg.into())
    }

    /// Create a new upstream data error
    pub fn data<S: Into<String>>(msg: S) -> Self {
        ListingError::UpstreamDataError(msg.into())
    }

    /// Create a new upstream unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        ListingError::UpstreamUnavailable(msg.into())
    }

    /// Create a new rate limit error
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        ListingError::UpstreamRateLimited { retry_after }
    }

    /// Whether trying again later (with the same request) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ListingError::UpstreamRateLimited { .. } | ListingError::UpstreamUnavailable(_)
        )
    }

    /// Retry hint supplied by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ListingError::UpstreamRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify the error for translation into a response.
    pub fn fault(&self) -> Fault {
        match self {
            ListingError::InvalidRequest(_) => Fault::Client,
            ListingError::UpstreamRejected(_) | ListingError::UpstreamDataError(_) => {
                Fault::Upstream
            }
            ListingError::UpstreamRateLimited { .. } | ListingError::UpstreamUnavailable(_) => {
                Fault::Retryable
            }
        }
    }

    /// HTTP status the serving layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.fault() {
            Fault::Client => 400,
            Fault::Upstream => 502,
            Fault::Retryable => 503,
        }
    }
}

impl From<reqwest::Error> for ListingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ListingError::UpstreamDataError(format!("Failed to decode response: {err}"))
        } else if err.is_timeout() {
            ListingError::UpstreamUnavailable(format!("Request timed out: {err}"))
        } else {
            ListingError::UpstreamUnavailable(format!("HTTP error: {err}"))
        }
    }
}

impl From<serde_json::Error> for ListingError {
    fn from(err: serde_json::Error) -> Self {
        ListingError::UpstreamDataError(format!("Malformed response body: {err}"))
    }
}

/// Errors raised while assembling a client or an aggregator.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An option is zero, out of range, or inconsistent with another option
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// A required credential was not provided
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl ConfigError {
    /// Create a new invalid option error
    pub fn invalid_option<S: Into<String>>(msg: S) -> Self {
        ConfigError::InvalidOption(msg.into())
    }
}
