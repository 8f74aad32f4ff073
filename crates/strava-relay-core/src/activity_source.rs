//! # Activity Source
//!
//! Fetches activity detail from Strava on behalf of a local user, refreshing
//! the user's access token when it is about to expire or was rejected.

use crate::stores::{CredentialStore, StoreError};
use crate::{ExternalObjectId, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strava_client::{ApiError, StravaActivity, StravaClient, TokenSet};
use tracing::{debug, info, instrument, warn};

/// Third-party lookup of activity detail.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<StravaActivity, UpstreamError>;
}

/// Errors fetching data from Strava
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Strava API error: {0}")]
    Api(#[from] ApiError),

    #[error("No Strava credentials stored for user {user_id}")]
    MissingCredentials { user_id: UserId },

    #[error("Activity id is not numeric: {activity_id}")]
    InvalidActivityId { activity_id: ExternalObjectId },

    #[error("Credential store error: {0}")]
    Credentials(#[source] StoreError),
}

impl UpstreamError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api(api_error) => api_error.is_transient(),
            Self::MissingCredentials { .. } => false,
            Self::InvalidActivityId { .. } => false,
            Self::Credentials(store_error) => store_error.is_transient(),
        }
    }

    /// Server-suggested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(api_error) => api_error.retry_after(),
            _ => None,
        }
    }
}

/// [`ActivitySource`] backed by the Strava API and a [`CredentialStore`].
#[derive(Clone)]
pub struct StravaActivitySource {
    client: StravaClient,
    credentials: Arc<dyn CredentialStore>,
    refresh_margin: chrono::Duration,
}

impl StravaActivitySource {
    pub fn new(client: StravaClient, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            credentials,
            refresh_margin: chrono::Duration::minutes(5),
        }
    }

    /// Refresh tokens that expire within `margin` before using them.
    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    async fn load_tokens(&self, user_id: &UserId) -> Result<TokenSet, UpstreamError> {
        self.credentials
            .get_tokens(user_id)
            .await
            .map_err(UpstreamError::Credentials)?
            .ok_or_else(|| UpstreamError::MissingCredentials {
                user_id: user_id.clone(),
            })
    }

    async fn refresh(
        &self,
        user_id: &UserId,
        current: &TokenSet,
    ) -> Result<TokenSet, UpstreamError> {
        let refreshed = self.client.refresh_token(current.refresh_token()).await?;
        self.credentials
            .save_tokens(user_id, refreshed.clone())
            .await
            .map_err(UpstreamError::Credentials)?;

        info!(
            user_id = %user_id,
            expires_at = %refreshed.expires_at(),
            "Refreshed Strava access token"
        );
        Ok(refreshed)
    }
}

#[async_trait]
impl ActivitySource for StravaActivitySource {
    #[instrument(skip_all, fields(user_id = %user_id, activity_id = %activity_id))]
    async fn fetch_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<StravaActivity, UpstreamError> {
        let numeric_id = activity_id
            .as_u64()
            .ok_or_else(|| UpstreamError::InvalidActivityId {
                activity_id: activity_id.clone(),
            })?;

        let mut tokens = self.load_tokens(user_id).await?;
        let mut refreshed = false;

        if tokens.expires_within(self.refresh_margin) {
            debug!("Access token near expiry, refreshing before fetch");
            tokens = self.refresh(user_id, &tokens).await?;
            refreshed = true;
        }

        match self.client.get_activity(tokens.access_token(), numeric_id).await {
            Err(ApiError::AuthenticationFailed) if !refreshed => {
                warn!("Access token rejected, refreshing and retrying once");
                let tokens = self.refresh(user_id, &tokens).await?;
                Ok(self.client.get_activity(tokens.access_token(), numeric_id).await?)
            }
            result => Ok(result?),
        }
    }
}

impl std::fmt::Debug for StravaActivitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StravaActivitySource")
            .field("client", &self.client)
            .field("credentials", &"<CredentialStore>")
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}

#[cfg(test)]
#[path = "activity_source_tests.rs"]
mod tests;
