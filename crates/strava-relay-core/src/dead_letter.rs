//! # Dead Letter Records
//!
//! Events that could not be processed are kept here for inspection and
//! replay. A record preserves:
//! - The event (normalized) or the raw body (when it was never dispatched)
//! - Why it was dead-lettered and the last error seen
//! - How many attempts were made

use crate::stores::StoreError;
use crate::webhook::WebhookEvent;
use crate::{EventId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reason for an event ending up in the dead-letter store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Transient failures exhausted all retry attempts
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
    },

    /// Permanent failure that cannot be retried
    PermanentFailure {
        /// Description of the permanent failure
        reason: String,
    },

    /// The handler panicked
    HandlerPanicked,

    /// Dispatch queue was full when the delivery arrived
    Overloaded,
}

impl DeadLetterReason {
    /// Short label for metrics and listings
    pub fn label(&self) -> &'static str {
        match self {
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::PermanentFailure { .. } => "permanent_failure",
            Self::HandlerPanicked => "handler_panicked",
            Self::Overloaded => "overloaded",
        }
    }
}

/// What was captured for replay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DeadLetterPayload {
    /// Raw delivery body, not yet normalized
    Raw(String),
    /// Normalized event
    Event(WebhookEvent),
}

/// Complete record of a dead-lettered event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterRecord {
    pub event_id: EventId,
    pub payload: DeadLetterPayload,
    pub reason: DeadLetterReason,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub received_at: Timestamp,
    pub dead_lettered_at: Timestamp,
}

impl DeadLetterRecord {
    /// Record for an event the dispatcher gave up on
    pub fn for_event(
        event: WebhookEvent,
        reason: DeadLetterReason,
        last_error: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            event_id: event.event_id,
            received_at: event.received_at,
            payload: DeadLetterPayload::Event(event),
            reason,
            last_error,
            attempts,
            dead_lettered_at: Timestamp::now(),
        }
    }

    /// Record for a raw delivery that was never dispatched
    pub fn for_raw(
        event_id: EventId,
        body: &[u8],
        received_at: Timestamp,
        reason: DeadLetterReason,
    ) -> Self {
        Self {
            event_id,
            payload: DeadLetterPayload::Raw(String::from_utf8_lossy(body).into_owned()),
            reason,
            last_error: None,
            attempts: 0,
            received_at,
            dead_lettered_at: Timestamp::now(),
        }
    }
}

/// Persistence for dead-lettered events
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn store(&self, record: DeadLetterRecord) -> Result<(), StoreError>;

    /// Most recently dead-lettered first.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, StoreError>;

    async fn get(&self, event_id: &EventId) -> Result<Option<DeadLetterRecord>, StoreError>;

    /// Returns whether the record existed.
    async fn remove(&self, event_id: &EventId) -> Result<bool, StoreError>;
}

#[cfg(test)]
#[path = "dead_letter_tests.rs"]
mod tests;
