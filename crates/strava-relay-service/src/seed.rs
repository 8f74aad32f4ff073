//! Startup links between Strava athletes and local users.
//!
//! The in-memory stores start empty; without links every event would end as
//! an unresolved identity. Links come from the `athletes` configuration
//! section.

use anyhow::Context;
use chrono::Utc;
use strava_client::TokenSet;
use strava_relay_api::AthleteLink;
use strava_relay_core::{ExternalOwnerId, InMemoryCredentialStore, InMemoryIdentityStore, UserId};
use tracing::{debug, info};

/// Load configured athlete links into the stores.
///
/// A configured refresh token is stored with an already expired access token
/// so the first activity fetch exchanges it. Returns the number of links.
pub fn seed_athletes(
    links: &[AthleteLink],
    identities: &InMemoryIdentityStore,
    credentials: &InMemoryCredentialStore,
) -> anyhow::Result<usize> {
    for link in links {
        let user_id = UserId::new(link.user_id.as_str())
            .with_context(|| format!("Invalid user_id for athlete {}", link.owner_id))?;

        identities.link(ExternalOwnerId::from(link.owner_id), user_id.clone());

        let has_credentials = !link.refresh_token.is_empty();
        if has_credentials {
            credentials.insert(
                user_id.clone(),
                TokenSet::new(String::new(), link.refresh_token.expose(), Utc::now()),
            );
        }

        debug!(
            owner_id = link.owner_id,
            user_id = %user_id,
            has_credentials,
            "Linked Strava athlete"
        );
    }

    info!(count = links.len(), "Loaded athlete links from configuration");
    Ok(links.len())
}

#[cfg(test)]
#[path = "seed_tests.rs"]
mod tests;
