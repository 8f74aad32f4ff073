//! Error types for Strava API operations.

use std::time::Duration;
use thiserror::Error;

/// Strava API client errors with retry classification.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP error response from the Strava API.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// Rate limit exceeded (HTTP 429).
    ///
    /// Strava uses fixed 15-minute windows, so `retry_after` is the time until
    /// the next window opens when it could be derived.
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    /// Request to the Strava API timed out.
    #[error("Request timeout")]
    Timeout,

    /// The access token was rejected (HTTP 401).
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The token lacks the scope needed for the resource (HTTP 403).
    #[error("Authorization failed")]
    AuthorizationFailed,

    /// The requested resource was not found (HTTP 404).
    #[error("Resource not found")]
    NotFound,

    /// Client misconfiguration (bad base URL, missing credentials).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Failed to parse a JSON response.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, etc.).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    ///
    /// Transient conditions include:
    /// - Server errors (5xx)
    /// - Rate limiting (429)
    /// - Request timeouts
    /// - Network/transport errors
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::RateLimitExceeded { .. } => true,
            Self::Timeout => true,
            Self::AuthenticationFailed => false,
            Self::AuthorizationFailed => false,
            Self::NotFound => false,
            Self::Configuration { .. } => false,
            Self::JsonError(_) => false,
            Self::HttpClientError(_) => true,
        }
    }

    /// Recommended delay before retrying, when the server told us.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map a `reqwest` transport error, separating timeouts from other failures.
    pub(crate) fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::HttpClientError(error)
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
