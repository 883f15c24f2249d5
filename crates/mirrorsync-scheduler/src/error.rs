//! Error types for the fetch scheduler.

use thiserror::Error;

/// Errors raised while configuring the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An update interval rule has an invalid pattern.
    #[error("invalid interval pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An update interval rule has a zero interval.
    #[error("interval for pattern {0:?} must be positive")]
    ZeroInterval(String),

    /// An update interval rule is too long to represent.
    #[error("interval for pattern {0:?} is out of range")]
    IntervalOverflow(String),

    /// The concurrency limit would stop every fetch.
    #[error("max_concurrent_fetches must be positive")]
    ZeroConcurrency,

    /// Fetch backend error.
    #[error("fetch backend error: {0}")]
    Fetch(#[from] FetchError),
}

/// Errors talking to the fetch backend.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response.
    #[error("fetch backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend accepted the request but reported a failure.
    #[error("fetch failed: {0}")]
    Backend(String),

    /// The request did not finish within the request timeout.
    #[error("request timed out")]
    Timeout,
}

/// Errors acquiring a concurrency slot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// Shutdown was signalled while waiting.
    #[error("limiter acquisition cancelled")]
    Cancelled,
}
