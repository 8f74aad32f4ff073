//! # Strava Client
//!
//! Minimal Strava API v3 client used by Strava-Relay to turn webhook
//! notifications into stored activities.
//!
//! The client covers the two calls the relay needs:
//!
//! - Fetching the detailed representation of an activity
//!   (`GET /activities/{id}`)
//! - Refreshing an athlete's short-lived access token
//!   (`POST /oauth/token` with `grant_type=refresh_token`)
//!
//! Every error carries an [`ApiError::is_transient`] classification so that
//! callers can decide whether a retry is worthwhile.
//!
//! ```no_run
//! use strava_client::{ClientConfig, StravaClient};
//!
//! # async fn example() -> Result<(), strava_client::ApiError> {
//! let client = StravaClient::builder()
//!     .config(ClientConfig::default().with_client_credentials("12345", "secret"))
//!     .build()?;
//!
//! let activity = client.get_activity("access-token", 987654321).await?;
//! println!("{} ({})", activity.name, activity.sport_type);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;

pub use auth::TokenSet;
pub use client::{
    ActivityAthlete, ClientConfig, RateLimitInfo, StravaActivity, StravaClient,
    StravaClientBuilder,
};
pub use error::ApiError;
