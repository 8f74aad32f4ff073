//! # Event Ledger
//!
//! Remembers the last completed event for each entity so redeliveries and
//! out-of-order deliveries can be skipped.
//!
//! Strava retries a delivery up to three times when it does not get a timely
//! `200`, so the same event can arrive more than once. Events for one entity
//! are processed in arrival order (see [`crate::SessionId`]); the ledger
//! additionally rejects events whose `event_time` predates the last event
//! completed for the same entity.

use crate::stores::StoreError;
use crate::webhook::WebhookEvent;
use crate::{EventId, SessionId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Marker for the last completed event of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event_id: EventId,
    pub idempotency_key: Option<String>,
    pub event_time: Option<Timestamp>,
    pub recorded_at: Timestamp,
}

impl LedgerEntry {
    pub fn for_event(event: &WebhookEvent) -> Self {
        Self {
            event_id: event.event_id,
            idempotency_key: event.idempotency_key(),
            event_time: event.event_time,
            recorded_at: Timestamp::now(),
        }
    }
}

/// Whether an event should be processed given the ledger state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDecision {
    Proceed,
    /// Same idempotency key as the last completed event.
    Duplicate,
    /// Older than the last completed event.
    Stale { last_event_time: Timestamp },
}

impl LedgerDecision {
    /// Compare an incoming event against the last completed one.
    pub fn evaluate(event: &WebhookEvent, last: Option<&LedgerEntry>) -> Self {
        let Some(last) = last else {
            return Self::Proceed;
        };

        if let (Some(key), Some(last_key)) =
            (event.idempotency_key(), last.idempotency_key.as_ref())
        {
            if &key == last_key {
                return Self::Duplicate;
            }
        }

        match (event.event_time, last.event_time) {
            (Some(time), Some(last_event_time)) if time < last_event_time => {
                Self::Stale { last_event_time }
            }
            _ => Self::Proceed,
        }
    }
}

/// Persistence for [`LedgerEntry`] markers, keyed by session.
#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn last_completed(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Record a completed event.
    ///
    /// Implementations must not replace an entry with one whose `event_time`
    /// is older.
    async fn record_completed(
        &self,
        session_id: &SessionId,
        entry: LedgerEntry,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
