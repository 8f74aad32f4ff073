//! # Strava Relay Service
//!
//! Binary entry point for the Strava webhook receiver.
//!
//! This executable:
//! - Loads configuration from files and environment (see [`settings`])
//! - Initializes structured logging
//! - Wires the Strava client, stores, handlers, dispatcher and dispatch pool
//! - Starts the HTTP server from strava-relay-api
//!
//! Exit codes: `1` bind failure, `2` server failure, `3` configuration error.

mod seed;
mod settings;

use anyhow::Context;
use std::sync::Arc;
use strava_client::StravaClient;
use strava_relay_api::{
    start_server, AppState, DispatchPool, LoggingConfig, ServiceConfig, ServiceError,
    ServiceMetrics,
};
use strava_relay_core::{
    DeadLetterStore, Dispatcher, InMemoryActivityStore, InMemoryCredentialStore,
    InMemoryDeadLetterStore, InMemoryEventLedger, InMemoryIdentityStore, StoreBackedHandlers,
    StravaActivitySource,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_EXIT_CODE: i32 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loaded = settings::load_service_config();

    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Service configuration is invalid; aborting. Fix the configuration and restart."
            );
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    info!("Starting Strava-Relay Service");

    let state = match build_state(service_config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = ?e, "Failed to initialize service; aborting");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    info!(
        host = %state.config.server.host,
        port = state.config.server.port,
        workers = state.config.dispatch.worker_count,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(state).await {
        error!("Server terminated with error: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => CONFIG_EXIT_CODE,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "strava_relay_service={level},strava_relay_api={level},strava_relay_core={level},strava_client={level},tower_http=debug",
            level = logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wire collaborators into the HTTP application state.
///
/// Must run inside the Tokio runtime because it starts the dispatch pool.
fn build_state(config: ServiceConfig) -> anyhow::Result<AppState> {
    let metrics = ServiceMetrics::new().context("Failed to register Prometheus metrics")?;

    let client = StravaClient::builder()
        .config(config.strava.client_config())
        .build()
        .context("Failed to build Strava API client")?;

    if config.strava.client_id.is_empty() {
        warn!("strava.client_id is not set; access tokens cannot be refreshed");
    }

    // In-memory stores keep the relay self-contained; persistent
    // implementations plug in through the same traits.
    let identities = Arc::new(InMemoryIdentityStore::new());
    let credentials = Arc::new(InMemoryCredentialStore::new());
    seed::seed_athletes(&config.athletes, &identities, &credentials)
        .context("Failed to load athlete links")?;
    let activities = Arc::new(InMemoryActivityStore::new());
    let ledger = Arc::new(InMemoryEventLedger::new());
    let dead_letters: Arc<dyn DeadLetterStore> = Arc::new(InMemoryDeadLetterStore::new());
    warn!("Using in-memory stores; state is lost on restart");

    let source = Arc::new(StravaActivitySource::new(client, credentials.clone()));
    let handlers = Arc::new(StoreBackedHandlers::new(source, activities, credentials));

    let dispatcher = Dispatcher::new(identities, handlers, ledger, dead_letters.clone())
        .with_retry_policy(config.dispatch.retry_policy())
        .with_metrics(metrics.clone());

    let pool = DispatchPool::start(
        Arc::new(dispatcher),
        &config.dispatch,
        Some(metrics.clone()),
    );

    Ok(AppState::new(config, pool, dead_letters, metrics))
}
