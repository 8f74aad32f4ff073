//! # Strava Relay Core
//!
//! Core business logic for the Strava Relay webhook receiver.
//!
//! This crate contains the domain logic for verifying Strava subscription
//! handshakes, normalizing webhook deliveries, resolving the owning local user
//! and dispatching each event to the handler that keeps local activity data in
//! sync with Strava.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`stores`],
//!   [`activity_source::ActivitySource`], [`ledger::EventLedger`],
//!   [`dead_letter::DeadLetterStore`])
//! - Infrastructure implementations are injected at runtime
//! - In-memory implementations live in [`adapters`]
//!
//! ## Usage
//!
//! ```rust
//! use strava_relay_core::{EventId, SessionId};
//! use strava_relay_core::webhook::ObjectType;
//!
//! let event_id = EventId::new();
//! let session_id = SessionId::for_entity(ObjectType::Activity, "1360128428");
//! assert_eq!(session_id.as_str(), "activity/1360128428");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier assigned to every received webhook delivery
///
/// Uses ULID for lexicographic sorting and global uniqueness. Strava does not
/// send a delivery id, so the receiver mints one at acknowledgement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Identifier grouping events that must be processed in order
///
/// Format: `{object_type}/{entity_id}`, e.g. `activity/1360128428` or
/// `athlete/134815`. All events sharing a session id are handled by the same
/// worker, one at a time, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID with validation
    pub fn new(value: String) -> Result<Self, ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "session_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "session_id".to_string(),
                max_length: 128,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "session_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        if value.contains("//") || value.starts_with('/') || value.ends_with('/') {
            return Err(ValidationError::InvalidFormat {
                field: "session_id".to_string(),
                message: "consecutive, leading, or trailing slashes not allowed".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Create the session ID for one Strava entity
    pub fn for_entity(object_type: webhook::ObjectType, entity_id: &str) -> Self {
        Self(format!("{}/{}", object_type.as_str(), entity_id))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Local (internal) user identifier
///
/// Opaque to the relay: whatever key the identity store uses for its users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "user_id".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Strava athlete id carried in `owner_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalOwnerId(String);

/// Strava object id carried in `object_id` (an activity id or an athlete id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalObjectId(String);

macro_rules! external_id {
    ($name:ident, $field:literal) => {
        impl $name {
            /// Create new identifier with validation
            ///
            /// Accepts any non-empty printable ASCII token of at most 64 characters.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(ValidationError::Required {
                        field: $field.to_string(),
                    });
                }

                if value.len() > 64 {
                    return Err(ValidationError::TooLong {
                        field: $field.to_string(),
                        max_length: 64,
                    });
                }

                if !value.chars().all(|c| c.is_ascii_graphic()) {
                    return Err(ValidationError::InvalidCharacters {
                        field: $field.to_string(),
                        invalid_chars: "non-ASCII or whitespace".to_string(),
                    });
                }

                Ok(Self(value))
            }

            /// Get string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Numeric value, when the identifier is a Strava numeric id
            pub fn as_u64(&self) -> Option<u64> {
                self.0.parse().ok()
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

external_id!(ExternalOwnerId, "owner_id");
external_id!(ExternalObjectId, "object_id");

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from Unix seconds
    ///
    /// Returns `None` when the value is outside the representable range.
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(seconds, 0).map(Self)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Unix seconds
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Time elapsed since this timestamp (zero if it lies in the future)
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.0).to_std().unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Validation errors for domain types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Subscription handshake verification
pub mod verification;

/// Webhook event model and normalization
pub mod webhook;

/// Collaborator traits for users, credentials and activities
pub mod stores;

/// Activity detail lookups against Strava
pub mod activity_source;

/// Per-event handlers
pub mod handlers;

/// Retry policy with exponential backoff
pub mod retry;

/// Idempotency and ordering ledger
pub mod ledger;

/// Dead-letter records for events that could not be processed
pub mod dead_letter;

/// Metrics collection abstraction
pub mod monitoring;

/// Event dispatcher state machine
pub mod dispatcher;

/// In-memory infrastructure implementations
pub mod adapters;

// Re-export key types for convenience
pub use activity_source::{ActivitySource, StravaActivitySource, UpstreamError};
pub use adapters::{
    InMemoryActivityStore, InMemoryCredentialStore, InMemoryDeadLetterStore,
    InMemoryEventLedger, InMemoryIdentityStore,
};
pub use dead_letter::{DeadLetterPayload, DeadLetterReason, DeadLetterRecord, DeadLetterStore};
pub use dispatcher::{Dispatcher, ProcessingOutcome, ProcessingStatus, SkipReason};
pub use handlers::{ActivityHandlers, HandlerError, StoreBackedHandlers};
pub use ledger::{EventLedger, LedgerDecision, LedgerEntry};
pub use monitoring::{MetricsCollector, NoOpMetricsCollector};
pub use retry::{RetryPolicy, RetryState};
pub use stores::{
    ActivityRecord, ActivityStore, CredentialStore, IdentityStore, StoreError, UpsertOutcome,
};
pub use verification::{VerificationChallenge, VerificationError, Verifier};
pub use webhook::{
    AspectType, EventKind, EventNormalizer, NormalizationError, ObjectType, WebhookEvent,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
