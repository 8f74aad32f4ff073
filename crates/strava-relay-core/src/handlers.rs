//! # Handler Set
//!
//! One handler per event kind. Handlers report to the dispatcher only; they
//! never see the HTTP layer.

use crate::activity_source::{ActivitySource, UpstreamError};
use crate::stores::{ActivityRecord, ActivityStore, CredentialStore, StoreError, UpsertOutcome};
use crate::{ExternalObjectId, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Errors raised by handlers
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(#[from] UpstreamError),

    #[error("Store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

impl HandlerError {
    /// Check if error is transient and the handler should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpstreamFetch(e) => e.is_transient(),
            Self::StoreWrite(e) => e.is_transient(),
        }
    }

    /// Server-suggested delay before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::UpstreamFetch(e) => e.retry_after(),
            Self::StoreWrite(_) => None,
        }
    }
}

/// The handlers the dispatcher routes events to.
///
/// Implementations must be safe to call again with the same arguments; the
/// dispatcher retries transient failures.
#[async_trait]
pub trait ActivityHandlers: Send + Sync {
    /// Fetch the activity and upsert it keyed by `(user_id, activity_id)`.
    async fn upsert_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<UpsertOutcome, HandlerError>;

    /// Remove the stored activity. Returns whether it existed.
    async fn delete_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<bool, HandlerError>;

    /// Revoke the user's Strava credentials. Returns whether any existed.
    async fn deauthorize(&self, user_id: &UserId) -> Result<bool, HandlerError>;
}

/// Handlers backed by an [`ActivitySource`] and the store collaborators.
#[derive(Clone)]
pub struct StoreBackedHandlers {
    source: Arc<dyn ActivitySource>,
    activities: Arc<dyn ActivityStore>,
    credentials: Arc<dyn CredentialStore>,
}

impl StoreBackedHandlers {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        activities: Arc<dyn ActivityStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            source,
            activities,
            credentials,
        }
    }
}

#[async_trait]
impl ActivityHandlers for StoreBackedHandlers {
    #[instrument(skip_all, fields(user_id = %user_id, activity_id = %activity_id))]
    async fn upsert_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<UpsertOutcome, HandlerError> {
        let activity = self.source.fetch_activity(user_id, activity_id).await?;
        let record = ActivityRecord::new(user_id.clone(), activity_id.clone(), activity);
        let outcome = self.activities.upsert(record).await?;

        info!(outcome = ?outcome, "Activity stored");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(user_id = %user_id, activity_id = %activity_id))]
    async fn delete_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<bool, HandlerError> {
        let existed = self.activities.delete(user_id, activity_id).await?;
        info!(existed, "Activity removed");
        Ok(existed)
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn deauthorize(&self, user_id: &UserId) -> Result<bool, HandlerError> {
        let existed = self.credentials.revoke(user_id).await?;
        info!(existed, "Strava credentials revoked");
        Ok(existed)
    }
}

impl std::fmt::Debug for StoreBackedHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBackedHandlers").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
