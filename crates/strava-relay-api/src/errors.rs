//! Error types for the HTTP service

use crate::dispatch_pool::DispatchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use strava_relay_core::StoreError;
use tracing::{error, warn};

/// Administrative endpoint errors with HTTP status code mapping
///
/// The webhook endpoints never produce these: verification failures are a
/// bare `403` and event deliveries are always acknowledged. Only the
/// dead-letter admin routes surface errors to callers.
///
/// - `400 Bad Request`: malformed path or query parameters
/// - `404 Not Found`: unknown dead-letter record
/// - `500 Internal Server Error`: permanent storage failures
/// - `503 Service Unavailable`: dispatch pool full or draining, storage
///   temporarily unavailable
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Invalid event id: {value}")]
    InvalidEventId { value: String },

    #[error("Dead-letter record not found: {event_id}")]
    NotFound { event_id: String },

    #[error("Dispatch unavailable: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            Self::InvalidEventId { .. } => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string(), None),
            Self::Dispatch(ref e) => {
                warn!(error = %e, "Replay rejected by dispatch pool");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), Some(5))
            }
            Self::Storage(ref e) if e.is_transient() => {
                warn!(error = %e, "Dead-letter store temporarily unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), Some(30))
            }
            Self::Storage(ref e) => {
                // Log detailed error server-side but return generic message to client
                error!(error = %e, "Dead-letter store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error occurred. Please try again later.".to_string(),
                    None,
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
