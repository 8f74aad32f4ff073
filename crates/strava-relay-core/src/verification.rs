//! Subscription handshake verification.
//!
//! When a push subscription is created Strava issues
//! `GET <callback>?hub.mode=subscribe&hub.verify_token=..&hub.challenge=..`
//! and expects the challenge echoed back within two seconds.

use serde::Deserialize;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The only mode Strava sends for subscription validation.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Handshake parameters taken from the query string.
///
/// Every field is optional at the transport level; a missing field simply
/// fails verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerificationChallenge {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,

    #[serde(rename = "hub.verify_token")]
    pub provided_token: Option<String>,

    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerificationChallenge {
    pub fn new(
        mode: impl Into<String>,
        provided_token: impl Into<String>,
        challenge: impl Into<String>,
    ) -> Self {
        Self {
            mode: Some(mode.into()),
            provided_token: Some(provided_token.into()),
            challenge: Some(challenge.into()),
        }
    }
}

/// Reasons a handshake is rejected.
///
/// The HTTP layer maps every variant to `403 Forbidden` with an empty body;
/// the variants only exist to make logs useful.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("Unsupported hub.mode: {mode:?}")]
    UnsupportedMode { mode: Option<String> },

    #[error("Verify token mismatch")]
    TokenMismatch,

    #[error("Missing hub.challenge")]
    MissingChallenge,
}

/// Holds the configured verify token and checks handshakes against it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Verifier {
    verify_token: String,
}

impl Verifier {
    pub fn new(verify_token: impl Into<String>) -> Self {
        Self {
            verify_token: verify_token.into(),
        }
    }

    /// Verify a handshake and return the challenge to echo.
    ///
    /// Succeeds only when `mode == "subscribe"`, the provided token equals the
    /// configured token and a challenge is present. The token comparison is
    /// constant time. No side effects.
    pub fn verify<'a>(
        &self,
        request: &'a VerificationChallenge,
    ) -> Result<&'a str, VerificationError> {
        if request.mode.as_deref() != Some(SUBSCRIBE_MODE) {
            return Err(VerificationError::UnsupportedMode {
                mode: request.mode.clone(),
            });
        }

        let provided = request.provided_token.as_deref().unwrap_or_default();
        if !self.token_matches(provided) {
            return Err(VerificationError::TokenMismatch);
        }

        request
            .challenge
            .as_deref()
            .ok_or(VerificationError::MissingChallenge)
    }

    fn token_matches(&self, provided: &str) -> bool {
        // An empty configured token never matches, even an empty provided one.
        if self.verify_token.is_empty() {
            return false;
        }
        bool::from(self.verify_token.as_bytes().ct_eq(provided.as_bytes()))
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("verify_token", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "verification_tests.rs"]
mod tests;
