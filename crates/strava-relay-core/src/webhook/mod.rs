//! # Webhook Event Module
//!
//! Canonical representation of a Strava push subscription event and the
//! normalizer that produces it from the raw delivery body.
//!
//! Strava delivers one event per POST:
//!
//! ```json
//! {
//!   "aspect_type": "update",
//!   "event_time": 1516126040,
//!   "object_id": 1360128428,
//!   "object_type": "activity",
//!   "owner_id": 134815,
//!   "subscription_id": 120475,
//!   "updates": { "title": "Messy" }
//! }
//! ```

use crate::{EventId, ExternalObjectId, ExternalOwnerId, SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod normalizer;

pub use normalizer::EventNormalizer;

// ============================================================================
// Core Types
// ============================================================================

/// Kind of Strava object an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Activity,
    Athlete,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Athlete => "athlete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "activity" => Some(Self::Activity),
            "athlete" => Some(Self::Athlete),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectType {
    Create,
    Update,
    Delete,
}

impl AspectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for AspectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler selected for an event
///
/// Every [`WebhookEvent`] the normalizer emits has exactly one kind; payloads
/// that map to none of these are rejected as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Activity created or updated: fetch and upsert.
    ActivityUpsert,
    /// Activity deleted: remove the local copy.
    ActivityDelete,
    /// Athlete revoked access for the application.
    Deauthorization,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityUpsert => "activity_upsert",
            Self::ActivityDelete => "activity_delete",
            Self::Deauthorization => "deauthorization",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized webhook event
///
/// Immutable once produced by the [`EventNormalizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: EventId,
    pub kind: EventKind,
    pub object_type: ObjectType,
    pub aspect_type: AspectType,
    pub owner_id: ExternalOwnerId,
    pub object_id: ExternalObjectId,
    /// Changed fields, values stringified (`false` and `"false"` are equal).
    pub updates: BTreeMap<String, String>,
    /// Sender-side event time, when present in the payload.
    pub event_time: Option<Timestamp>,
    pub subscription_id: Option<u64>,
    pub received_at: Timestamp,
}

impl WebhookEvent {
    /// Build an activity event.
    pub fn activity(
        aspect_type: AspectType,
        owner_id: ExternalOwnerId,
        object_id: ExternalObjectId,
    ) -> Self {
        let kind = match aspect_type {
            AspectType::Create | AspectType::Update => EventKind::ActivityUpsert,
            AspectType::Delete => EventKind::ActivityDelete,
        };

        Self {
            event_id: EventId::new(),
            kind,
            object_type: ObjectType::Activity,
            aspect_type,
            owner_id,
            object_id,
            updates: BTreeMap::new(),
            event_time: None,
            subscription_id: None,
            received_at: Timestamp::now(),
        }
    }

    /// Build a deauthorization event for an athlete.
    pub fn deauthorization(owner_id: ExternalOwnerId) -> Self {
        let mut updates = BTreeMap::new();
        updates.insert("authorized".to_string(), "false".to_string());

        Self {
            event_id: EventId::new(),
            kind: EventKind::Deauthorization,
            object_type: ObjectType::Athlete,
            aspect_type: AspectType::Update,
            object_id: ExternalObjectId(owner_id.as_str().to_string()),
            owner_id,
            updates,
            event_time: None,
            subscription_id: None,
            received_at: Timestamp::now(),
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_event_time(mut self, event_time: Timestamp) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Ordering group for the entity this event touches.
    ///
    /// Activity events are grouped by activity, athlete events by athlete.
    pub fn session_id(&self) -> SessionId {
        match self.object_type {
            ObjectType::Activity => {
                SessionId::for_entity(ObjectType::Activity, self.object_id.as_str())
            }
            ObjectType::Athlete => {
                SessionId::for_entity(ObjectType::Athlete, self.owner_id.as_str())
            }
        }
    }

    /// Key identifying one logical delivery across redeliveries.
    ///
    /// Format: `{object_type}:{object_id}:{aspect_type}:{event_time}:{updates}`
    /// with `updates` as sorted JSON. `event_time` only has second
    /// resolution, so two edits within the same second differ by their
    /// updates alone. Events without an event time have no key and are never
    /// treated as duplicates.
    pub fn idempotency_key(&self) -> Option<String> {
        self.event_time.map(|time| {
            format!(
                "{}:{}:{}:{}:{}",
                self.object_type,
                self.object_id,
                self.aspect_type,
                time.unix_seconds(),
                serde_json::to_string(&self.updates).unwrap_or_default()
            )
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors during event normalization
#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Invalid field format: {field} - {message}")]
    InvalidFieldFormat { field: String, message: String },

    #[error("Unsupported event: object_type={object_type} aspect_type={aspect_type}")]
    Unsupported {
        object_type: String,
        aspect_type: String,
    },
}

impl NormalizationError {
    /// Whether the payload was well formed but carries an event nobody handles.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
