//! Error types for price feed operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching a price.
///
/// Every variant carries its cause so the scheduler can log it; all of them
/// are handled the same way by the polling loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected HTTP status: {0}")]
    HttpStatus(u16),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

impl FetchError {
    /// Returns true if the upstream is likely to answer correctly on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::RateLimitExceeded => true,
            FetchError::HttpStatus(code) => *code >= 500,
            FetchError::Malformed(_) => false,
        }
    }

    /// Minimum wait the upstream asks for before the next attempt, if any.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimitExceeded => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}
