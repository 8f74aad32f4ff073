//! Service configuration types.
//!
//! Every section carries serde defaults so an empty configuration source
//! deserializes into a usable [`ServiceConfig`]; [`ServiceConfig::validate`]
//! then rejects values the service cannot run with.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use strava_client::ClientConfig;
use std::collections::HashSet;
use strava_relay_core::{RetryPolicy, UserId};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret string that never appears in `Debug` output or serialized config.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<REDACTED>")
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub strava: StravaConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
    /// Athlete links loaded into the identity and credential stores at startup.
    pub athletes: Vec<AthleteLink>,
}

impl ServiceConfig {
    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strava.verify_token.is_empty() {
            return Err(ConfigError::Missing {
                key: "strava.verify_token".to_string(),
            });
        }

        let positive = [
            ("server.timeout_seconds", self.server.timeout_seconds),
            (
                "server.shutdown_timeout_seconds",
                self.server.shutdown_timeout_seconds,
            ),
            (
                "strava.request_timeout_seconds",
                self.strava.request_timeout_seconds,
            ),
            ("dispatch.worker_count", self.dispatch.worker_count as u64),
            ("dispatch.queue_capacity", self.dispatch.queue_capacity as u64),
            ("dispatch.route_timeout_ms", self.dispatch.route_timeout_ms),
            ("dispatch.max_attempts", self.dispatch.max_attempts as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{} must be greater than zero", key),
                });
            }
        }

        if self.dispatch.base_delay_ms > self.dispatch.max_delay_ms {
            return Err(ConfigError::Invalid {
                message: format!(
                    "dispatch.base_delay_ms ({}) exceeds dispatch.max_delay_ms ({})",
                    self.dispatch.base_delay_ms, self.dispatch.max_delay_ms
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.dispatch.jitter_percent) {
            return Err(ConfigError::Invalid {
                message: "dispatch.jitter_percent must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }

        let mut owners = HashSet::new();
        for link in &self.athletes {
            if UserId::new(link.user_id.as_str()).is_err() {
                return Err(ConfigError::Invalid {
                    message: format!("athletes: owner {} has an empty user_id", link.owner_id),
                });
            }
            if !owners.insert(link.owner_id) {
                return Err(ConfigError::Invalid {
                    message: format!("athletes: owner {} is linked more than once", link.owner_id),
                });
            }
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
    /// Upper bound on draining the dispatch pool after the server stops.
    pub shutdown_timeout_seconds: u64,
    pub max_body_size: usize,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout_seconds: 30,
            shutdown_timeout_seconds: 30,
            max_body_size: 64 * 1024, // Strava events are a few hundred bytes
            enable_cors: false,
        }
    }
}

/// Strava subscription and API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StravaConfig {
    /// Token chosen when the push subscription was created.
    pub verify_token: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_base_url: String,
    pub oauth_token_url: String,
    pub request_timeout_seconds: u64,
}

impl StravaConfig {
    /// Client configuration for outbound Strava calls.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_api_base_url(self.api_base_url.clone())
            .with_oauth_token_url(self.oauth_token_url.clone())
            .with_timeout(Duration::from_secs(self.request_timeout_seconds))
            .with_client_credentials(self.client_id.clone(), self.client_secret.expose())
    }
}

impl Default for StravaConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            verify_token: SecretString::default(),
            client_id: String::new(),
            client_secret: SecretString::default(),
            api_base_url: client.api_base_url.clone(),
            oauth_token_url: client.oauth_token_url.clone(),
            request_timeout_seconds: client.timeout.as_secs(),
        }
    }
}

/// Dispatch pool and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub worker_count: usize,
    /// Capacity of the ingress queue and of each worker queue.
    pub queue_capacity: usize,
    /// How long the router waits for room in a full worker queue before
    /// dead-lettering the event.
    pub route_timeout_ms: u64,
    /// Total handler attempts per event, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_percent: f64,
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter_percent(self.jitter_percent)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            route_timeout_ms: 1_000,
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_percent: 0.25,
        }
    }
}

/// Strava athlete linked to a local user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteLink {
    pub owner_id: u64,
    pub user_id: String,
    /// Exchanged for an access token on the first activity fetch.
    #[serde(default)]
    pub refresh_token: SecretString,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
