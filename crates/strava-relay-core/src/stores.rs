//! # Store Collaborators
//!
//! Trait seams for the data the relay reads and writes. The relay owns none of
//! this data: the host application provides implementations backed by its own
//! database, and [`crate::adapters`] provides in-memory versions.

use crate::{ExternalObjectId, ExternalOwnerId, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strava_client::{StravaActivity, TokenSet};

// ============================================================================
// Records
// ============================================================================

/// Local copy of a Strava activity, keyed by `(user_id, activity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: UserId,
    pub activity_id: ExternalObjectId,
    pub activity: StravaActivity,
    pub synced_at: Timestamp,
}

impl ActivityRecord {
    pub fn new(user_id: UserId, activity_id: ExternalObjectId, activity: StravaActivity) -> Self {
        Self {
            user_id,
            activity_id,
            activity,
            synced_at: Timestamp::now(),
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

// ============================================================================
// Traits
// ============================================================================

/// Maps Strava athlete ids to local users.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve the local user linked to a Strava athlete.
    ///
    /// `Ok(None)` means no link exists; that is not an error.
    async fn resolve_user(&self, owner_id: &ExternalOwnerId) -> Result<Option<UserId>, StoreError>;
}

/// Per-user Strava OAuth credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_tokens(&self, user_id: &UserId) -> Result<Option<TokenSet>, StoreError>;

    /// Replace the stored tokens (refresh tokens rotate on every refresh).
    async fn save_tokens(&self, user_id: &UserId, tokens: TokenSet) -> Result<(), StoreError>;

    /// Remove the user's credentials. Returns whether any were stored.
    async fn revoke(&self, user_id: &UserId) -> Result<bool, StoreError>;
}

/// Local activity storage.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert or replace the record for `(record.user_id, record.activity_id)`.
    async fn upsert(&self, record: ActivityRecord) -> Result<UpsertOutcome, StoreError>;

    /// Delete a record. Returns whether it existed.
    async fn delete(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<bool, StoreError>;

    async fn get(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<Option<ActivityRecord>, StoreError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from store collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Storage operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Storage not available: {message}")]
    Unavailable { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Constraint violated: {message}")]
    ConstraintViolation { message: String },
}

impl StoreError {
    /// Check if store error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::OperationFailed { .. } => true,
            Self::Unavailable { .. } => true,
            Self::PermissionDenied { .. } => false,
            Self::ConstraintViolation { .. } => false,
        }
    }
}

#[cfg(test)]
#[path = "stores_tests.rs"]
mod tests;
