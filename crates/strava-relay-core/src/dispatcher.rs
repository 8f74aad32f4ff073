//! # Event Dispatcher
//!
//! Drives one event from the raw body to a final [`ProcessingOutcome`]:
//!
//! ```text
//! Received -> Normalized -> IdentityResolved -> HandlerDispatched -> Completed
//!     |            |               |                   |
//!     +-> Skipped  +-> Skipped     +-> Skipped         +-> Failed (dead-lettered)
//!      (parse)      (dup/stale)     (unknown owner)
//! ```
//!
//! The dispatcher never panics on bad input and never returns an error: every
//! path ends in an outcome that is logged, counted and, for failures, written
//! to the dead-letter store.

use crate::dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterStore};
use crate::handlers::{ActivityHandlers, HandlerError};
use crate::ledger::{EventLedger, LedgerDecision, LedgerEntry};
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};
use crate::retry::{RetryPolicy, RetryState};
use crate::stores::{IdentityStore, StoreError, UpsertOutcome};
use crate::webhook::{EventKind, EventNormalizer, NormalizationError, WebhookEvent};
use crate::{EventId, Timestamp, UserId};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// Outcomes
// ============================================================================

/// Why an event was not handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Body was not a valid event
    ParseError { message: String },
    /// Valid event that no handler consumes
    Unsupported {
        object_type: String,
        aspect_type: String,
    },
    /// No local user linked to the Strava athlete
    UnresolvedIdentity,
    /// Redelivery of the last completed event
    Duplicate,
    /// Older than the last completed event for the entity
    Stale,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::Unsupported { .. } => "unsupported",
            Self::UnresolvedIdentity => "unresolved_identity",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// Final state of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processed,
    Skipped(SkipReason),
    Failed { error: String },
}

impl ProcessingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped(_) => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of dispatching one delivery
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub event_id: EventId,
    /// `None` when the body never normalized.
    pub event: Option<WebhookEvent>,
    pub status: ProcessingStatus,
    /// Handler (or identity lookup) calls made.
    pub attempts: u32,
    pub completed_at: Timestamp,
}

impl ProcessingOutcome {
    fn new(
        event_id: EventId,
        event: Option<WebhookEvent>,
        status: ProcessingStatus,
        attempts: u32,
    ) -> Self {
        Self {
            event_id,
            event,
            status,
            attempts,
            completed_at: Timestamp::now(),
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self.status, ProcessingStatus::Processed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ProcessingStatus::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ProcessingStatus::Failed { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.status {
            ProcessingStatus::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

// ============================================================================
// Retry plumbing
// ============================================================================

/// Errors the retry loop understands
trait Retryable: fmt::Display {
    fn is_transient(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
}

impl Retryable for HandlerError {
    fn is_transient(&self) -> bool {
        HandlerError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        HandlerError::retry_after(self)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

struct AttemptFailure {
    message: String,
    transient: bool,
    attempts: u32,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes normalized events to handlers.
///
/// Shared across pool workers behind an `Arc`; holds no per-event state.
pub struct Dispatcher {
    normalizer: EventNormalizer,
    identities: Arc<dyn IdentityStore>,
    handlers: Arc<dyn ActivityHandlers>,
    ledger: Arc<dyn EventLedger>,
    dead_letters: Arc<dyn DeadLetterStore>,
    metrics: Arc<dyn MetricsCollector>,
    retry_policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        handlers: Arc<dyn ActivityHandlers>,
        ledger: Arc<dyn EventLedger>,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        Self {
            normalizer: EventNormalizer::new(),
            identities,
            handlers,
            ledger,
            dead_letters,
            metrics: Arc::new(NoOpMetricsCollector),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }

    /// Received -> Normalized.
    ///
    /// On failure the returned error is the final (Skipped) outcome, already
    /// logged and counted.
    pub fn normalize(
        &self,
        event_id: EventId,
        payload: &[u8],
        received_at: Timestamp,
    ) -> Result<WebhookEvent, ProcessingOutcome> {
        self.normalizer
            .normalize(event_id, payload, received_at)
            .map_err(|e| {
                let reason = match e {
                    NormalizationError::Unsupported {
                        object_type,
                        aspect_type,
                    } => {
                        info!(
                            event_id = %event_id,
                            object_type = %object_type,
                            aspect_type = %aspect_type,
                            "Ignoring unsupported webhook event"
                        );
                        SkipReason::Unsupported {
                            object_type,
                            aspect_type,
                        }
                    }
                    other => {
                        warn!(
                            event_id = %event_id,
                            error = %other,
                            "Dropping malformed webhook payload"
                        );
                        SkipReason::ParseError {
                            message: other.to_string(),
                        }
                    }
                };
                self.finish(ProcessingOutcome::new(
                    event_id,
                    None,
                    ProcessingStatus::Skipped(reason),
                    0,
                ))
            })
    }

    /// Normalize and dispatch a raw delivery body.
    pub async fn process_payload(
        &self,
        event_id: EventId,
        payload: &[u8],
        received_at: Timestamp,
    ) -> ProcessingOutcome {
        match self.normalize(event_id, payload, received_at) {
            Ok(event) => self.dispatch(event).await,
            Err(outcome) => outcome,
        }
    }

    /// Normalized -> Completed | Skipped | Failed.
    pub async fn dispatch(&self, event: WebhookEvent) -> ProcessingOutcome {
        let session_id = event.session_id();

        match self.ledger.last_completed(&session_id).await {
            Ok(last) => match LedgerDecision::evaluate(&event, last.as_ref()) {
                LedgerDecision::Proceed => {}
                LedgerDecision::Duplicate => {
                    info!(
                        event_id = %event.event_id,
                        session_id = %session_id,
                        "Skipping duplicate delivery"
                    );
                    return self.skip(event, SkipReason::Duplicate, 0);
                }
                LedgerDecision::Stale { last_event_time } => {
                    info!(
                        event_id = %event.event_id,
                        session_id = %session_id,
                        last_event_time = %last_event_time,
                        "Skipping event older than last completed"
                    );
                    return self.skip(event, SkipReason::Stale, 0);
                }
            },
            // Handlers are idempotent, so a ledger outage only costs duplicate work.
            Err(e) => warn!(
                event_id = %event.event_id,
                error = %e,
                "Ledger lookup failed, processing anyway"
            ),
        }

        // Normalized -> IdentityResolved
        let identities = &self.identities;
        let owner_id = &event.owner_id;
        let resolved = self
            .run_with_retry(&event, "resolve_identity", || identities.resolve_user(owner_id))
            .await;

        let (user_id, lookup_attempts) = match resolved {
            Ok((Some(user_id), attempts)) => (user_id, attempts),
            Ok((None, attempts)) => {
                info!(
                    event_id = %event.event_id,
                    owner_id = %event.owner_id,
                    "No local user linked to Strava athlete, skipping"
                );
                return self.skip(event, SkipReason::UnresolvedIdentity, attempts);
            }
            Err(failure) => return self.fail(event, failure).await,
        };

        debug!(event_id = %event.event_id, user_id = %user_id, "Identity resolved");

        // IdentityResolved -> HandlerDispatched -> Completed | Failed
        let result = self
            .run_with_retry(&event, event.kind.as_str(), || self.invoke_handler(&event, &user_id))
            .await;

        match result {
            Ok((detail, attempts)) => {
                if let Err(e) = self
                    .ledger
                    .record_completed(&session_id, LedgerEntry::for_event(&event))
                    .await
                {
                    warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to record completed event in ledger"
                    );
                }

                info!(
                    event_id = %event.event_id,
                    kind = %event.kind,
                    user_id = %user_id,
                    object_id = %event.object_id,
                    attempts,
                    detail,
                    latency_ms = event.received_at.elapsed().as_millis() as u64,
                    "Webhook event processed"
                );
                self.finish(ProcessingOutcome::new(
                    event.event_id,
                    Some(event),
                    ProcessingStatus::Processed,
                    lookup_attempts + attempts,
                ))
            }
            Err(failure) => self.fail(event, failure).await,
        }
    }

    /// Record an event whose processing task panicked.
    pub async fn record_panic(&self, event: WebhookEvent) -> ProcessingOutcome {
        error!(event_id = %event.event_id, kind = %event.kind, "Handler panicked");
        self.dead_letter(
            event,
            DeadLetterReason::HandlerPanicked,
            "handler panicked".to_string(),
            1,
        )
        .await
    }

    async fn invoke_handler(
        &self,
        event: &WebhookEvent,
        user_id: &UserId,
    ) -> Result<&'static str, HandlerError> {
        let started = Instant::now();

        let result = match event.kind {
            EventKind::ActivityUpsert => self
                .handlers
                .upsert_activity(user_id, &event.object_id)
                .await
                .map(|outcome| match outcome {
                    UpsertOutcome::Inserted => "inserted",
                    UpsertOutcome::Updated => "updated",
                }),
            EventKind::ActivityDelete => self
                .handlers
                .delete_activity(user_id, &event.object_id)
                .await
                .map(|existed| if existed { "deleted" } else { "already_absent" }),
            EventKind::Deauthorization => self
                .handlers
                .deauthorize(user_id)
                .await
                .map(|existed| if existed { "revoked" } else { "no_credentials" }),
        };

        self.metrics
            .record_handler_call(event.kind, started.elapsed(), result.is_ok());
        result
    }

    async fn run_with_retry<T, E, F, Fut>(
        &self,
        event: &WebhookEvent,
        operation: &str,
        mut call: F,
    ) -> Result<(T, u32), AttemptFailure>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::new();

        loop {
            let error = match call().await {
                Ok(value) => return Ok((value, state.attempts)),
                Err(error) => error,
            };

            let transient = error.is_transient();
            if !transient || !state.can_retry(&self.retry_policy) {
                warn!(
                    event_id = %event.event_id,
                    operation,
                    attempt = state.attempts,
                    transient,
                    error = %error,
                    "Giving up on operation"
                );
                return Err(AttemptFailure {
                    message: error.to_string(),
                    transient,
                    attempts: state.attempts,
                });
            }

            let delay = state.next_delay(&self.retry_policy, error.retry_after());
            warn!(
                event_id = %event.event_id,
                operation,
                attempt = state.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            self.metrics.record_handler_retry(event.kind);

            tokio::time::sleep(delay).await;
            state.next_attempt();
        }
    }

    async fn fail(&self, event: WebhookEvent, failure: AttemptFailure) -> ProcessingOutcome {
        let reason = if failure.transient {
            DeadLetterReason::RetriesExhausted {
                attempts: failure.attempts,
            }
        } else {
            DeadLetterReason::PermanentFailure {
                reason: failure.message.clone(),
            }
        };
        self.dead_letter(event, reason, failure.message, failure.attempts)
            .await
    }

    async fn dead_letter(
        &self,
        event: WebhookEvent,
        reason: DeadLetterReason,
        message: String,
        attempts: u32,
    ) -> ProcessingOutcome {
        let event_id = event.event_id;
        let reason_label = reason.label();
        let record =
            DeadLetterRecord::for_event(event.clone(), reason, Some(message.clone()), attempts);

        match self.dead_letters.store(record).await {
            Ok(()) => {
                self.metrics.record_dead_letter(reason_label);
                error!(
                    event_id = %event_id,
                    kind = %event.kind,
                    owner_id = %event.owner_id,
                    object_id = %event.object_id,
                    reason = reason_label,
                    attempts,
                    error = %message,
                    "Webhook event failed, moved to dead-letter store"
                );
            }
            Err(e) => error!(
                event_id = %event_id,
                error = %message,
                store_error = %e,
                "Webhook event failed and could not be dead-lettered"
            ),
        }

        self.finish(ProcessingOutcome::new(
            event_id,
            Some(event),
            ProcessingStatus::Failed { error: message },
            attempts,
        ))
    }

    fn skip(&self, event: WebhookEvent, reason: SkipReason, attempts: u32) -> ProcessingOutcome {
        self.finish(ProcessingOutcome::new(
            event.event_id,
            Some(event),
            ProcessingStatus::Skipped(reason),
            attempts,
        ))
    }

    fn finish(&self, outcome: ProcessingOutcome) -> ProcessingOutcome {
        self.metrics.record_outcome(outcome.status.label());
        if let ProcessingStatus::Skipped(reason) = &outcome.status {
            debug!(event_id = %outcome.event_id, reason = reason.label(), "Webhook event skipped");
        }
        outcome
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
