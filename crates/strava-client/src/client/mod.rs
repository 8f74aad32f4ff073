//! Strava API client for activity lookups and token refresh.
//!
//! The client is intentionally thin: it performs one HTTP call per method,
//! maps HTTP status codes onto [`ApiError`] variants and leaves retry
//! decisions to the caller.

mod activity;
mod rate_limit;

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::auth::{TokenResponse, TokenSet};
use crate::error::ApiError;

pub use activity::{ActivityAthlete, StravaActivity};
pub use rate_limit::RateLimitInfo;

/// Configuration for Strava API client behavior.
///
/// # Examples
///
/// ```
/// use strava_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_timeout(Duration::from_secs(10))
///     .with_client_credentials("12345", "secret");
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// User agent string for API requests
    pub user_agent: String,
    /// Request timeout duration
    pub timeout: Duration,
    /// Strava API v3 base URL
    pub api_base_url: String,
    /// OAuth token endpoint
    pub oauth_token_url: String,
    /// OAuth application client id
    pub client_id: String,
    /// OAuth application client secret
    pub client_secret: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("strava-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(15),
            api_base_url: "https://www.strava.com/api/v3".to_string(),
            oauth_token_url: "https://www.strava.com/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

impl ClientConfig {
    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the API base URL (tests point this at a mock server).
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the OAuth token endpoint.
    pub fn with_oauth_token_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_token_url = url.into();
        self
    }

    /// Set the OAuth application credentials used for token refresh.
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("api_base_url", &self.api_base_url)
            .field("oauth_token_url", &self.oauth_token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .finish()
    }
}

/// Strava API client.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct StravaClient {
    http_client: reqwest::Client,
    config: ClientConfig,
}

impl StravaClient {
    /// Create a new client builder.
    pub fn builder() -> StravaClientBuilder {
        StravaClientBuilder::new()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch the detailed representation of an activity.
    ///
    /// # Errors
    ///
    /// - [`ApiError::AuthenticationFailed`] when the access token is rejected
    /// - [`ApiError::NotFound`] when the activity does not exist or is not visible
    /// - [`ApiError::RateLimitExceeded`] when Strava throttles the application
    #[instrument(skip(self, access_token))]
    pub async fn get_activity(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<StravaActivity, ApiError> {
        let url = format!(
            "{}/activities/{}",
            self.config.api_base_url.trim_end_matches('/'),
            activity_id
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("include_all_efforts", "false")])
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = Self::check_status(response).await?;
        let body = response.bytes().await.map_err(ApiError::from_transport)?;
        let activity = serde_json::from_slice::<StravaActivity>(&body)?;

        debug!(activity_id = activity.id, "Fetched activity detail");
        Ok(activity)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The returned [`TokenSet`] contains a rotated refresh token that must
    /// replace the stored one.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(ApiError::Configuration {
                message: "client id and client secret are required for token refresh"
                    .to_string(),
            });
        }

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http_client
            .post(&self.config.oauth_token_url)
            .form(&params)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = Self::check_status(response).await?;
        let body = response.bytes().await.map_err(ApiError::from_transport)?;
        let token_response = serde_json::from_slice::<TokenResponse>(&body)?;

        token_response
            .into_token_set()
            .ok_or_else(|| ApiError::HttpError {
                status: 200,
                message: "token response carried an invalid expires_at".to_string(),
            })
    }

    /// Map non-success responses onto error variants.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            401 => Err(ApiError::AuthenticationFailed),
            403 => Err(ApiError::AuthorizationFailed),
            404 => Err(ApiError::NotFound),
            429 => {
                let rate_limit = RateLimitInfo::from_headers(response.headers());
                warn!(rate_limit = ?rate_limit, "Strava rate limit exceeded");
                Err(ApiError::RateLimitExceeded {
                    retry_after: rate_limit.map(|info| info.time_until_window_reset()),
                })
            }
            code => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error body".to_string());
                Err(ApiError::HttpError {
                    status: code,
                    message,
                })
            }
        }
    }
}

impl std::fmt::Debug for StravaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StravaClient")
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for constructing `StravaClient` instances.
#[derive(Debug, Default)]
pub struct StravaClientBuilder {
    config: Option<ClientConfig>,
}

impl StravaClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self { config: None }
    }

    /// Set the client configuration.
    ///
    /// If not set, uses `ClientConfig::default()`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the Strava client.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` if a URL is invalid or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<StravaClient, ApiError> {
        let config = self.config.unwrap_or_default();

        for (name, value) in [
            ("api_base_url", &config.api_base_url),
            ("oauth_token_url", &config.oauth_token_url),
        ] {
            url::Url::parse(value).map_err(|e| ApiError::Configuration {
                message: format!("Invalid {}: {}", name, e),
            })?;
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(StravaClient {
            http_client,
            config,
        })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
