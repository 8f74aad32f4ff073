//! OAuth token handling for Strava athletes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Access/refresh token pair for a single athlete.
///
/// Strava access tokens live for six hours; the refresh token is rotated on
/// every refresh and must be persisted again afterwards.
///
/// Token material is wiped from memory on drop and never shown by `Debug`.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenSet {
    access_token: String,
    refresh_token: String,
    #[zeroize(skip)]
    expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Create a token set.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Access token for API calls (only for immediate use).
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Refresh token for obtaining a new access token.
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Expiry instant of the access token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check whether the access token expires within `margin`.
    ///
    /// A small margin avoids starting a request with a token that expires
    /// while the request is in flight.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response body of `POST /oauth/token`.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds).
    pub expires_at: i64,
}

impl TokenResponse {
    pub(crate) fn into_token_set(self) -> Option<TokenSet> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0)?;
        Some(TokenSet::new(self.access_token, self.refresh_token, expires_at))
    }
}
