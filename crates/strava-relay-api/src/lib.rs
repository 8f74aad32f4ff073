//! # Strava Relay API
//!
//! HTTP service layer for the Strava webhook receiver.
//!
//! This crate provides:
//! - The subscription handshake endpoint (`GET /webhooks/strava`)
//! - The event delivery endpoint (`POST /webhooks/strava`), which always
//!   acknowledges and hands the body to the [`dispatch_pool::DispatchPool`]
//! - Health, readiness and Prometheus metrics endpoints
//! - Dead-letter inspection and replay endpoints
//! - Graceful shutdown that drains the dispatch pool

pub mod config;
pub mod dispatch_pool;
pub mod errors;
pub mod metrics;

pub use config::{
    AthleteLink, DispatchConfig, LoggingConfig, SecretString, ServerConfig, ServiceConfig,
    StravaConfig,
};
pub use dispatch_pool::{DispatchError, DispatchJob, DispatchPool, DispatchStats, JobPayload};
pub use errors::{AdminError, ConfigError, ServiceError};
pub use metrics::ServiceMetrics;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use strava_relay_core::{
    DeadLetterRecord, DeadLetterStore, EventId, Timestamp, VerificationChallenge, Verifier,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{debug, error, info, instrument, warn};

/// Acknowledgement body Strava expects for every event delivery.
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

/// Path Strava calls for both the handshake and event deliveries.
pub const WEBHOOK_PATH: &str = "/webhooks/strava";

const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;
const MAX_DEAD_LETTER_LIMIT: usize = 500;

// ============================================================================
// Application State
// ============================================================================

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub verifier: Arc<Verifier>,
    pub pool: Arc<DispatchPool>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub metrics: Arc<ServiceMetrics>,
    /// Set once a shutdown signal arrives, before the pool starts draining.
    pub shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        pool: Arc<DispatchPool>,
        dead_letters: Arc<dyn DeadLetterStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let verifier = Arc::new(Verifier::new(config.strava.verify_token.expose()));
        Self {
            config,
            verifier,
            pool,
            dead_letters,
            metrics,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the service should receive new traffic.
    pub fn is_ready(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst) && !self.pool.is_draining()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP router
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.server.max_body_size;
    let request_timeout = Duration::from_secs(state.config.server.timeout_seconds);
    let enable_cors = state.config.server.enable_cors;

    let webhook_routes = Router::new().route(
        WEBHOOK_PATH,
        get(handle_verification).post(handle_event_delivery),
    );

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let admin_routes = Router::new()
        .route("/admin/dead-letters", get(list_dead_letters))
        .route(
            "/admin/dead-letters/{event_id}/replay",
            post(replay_dead_letter),
        )
        .route("/admin/dispatch", get(get_dispatch_stats));

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(observability_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CompressionLayer::new())
                .option_layer(enable_cors.then(CorsLayer::permissive))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
///
/// Serves until SIGINT or SIGTERM, then stops accepting connections, waits
/// for in-flight requests and finally drains the dispatch pool within
/// `server.shutdown_timeout_seconds`.
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener =
        tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.clone(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = Duration::from_secs(state.config.server.shutdown_timeout_seconds);
    let pool = state.pool.clone();
    let shutting_down = state.shutting_down.clone();
    let app = create_router(state);

    let shutdown = async move {
        shutdown_signal(shutdown_timeout).await;
        shutting_down.store(true, Ordering::SeqCst);
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server stopped accepting requests");

    if !pool.shutdown(shutdown_timeout).await {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Shutdown timeout elapsed with events still being processed"
        );
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Subscription handshake
///
/// `200 {"hub.challenge": ...}` when the mode and verify token match,
/// otherwise `403` with an empty body.
#[instrument(skip_all, fields(mode = ?params.mode))]
async fn handle_verification(
    State(state): State<AppState>,
    Query(params): Query<VerificationChallenge>,
) -> Response {
    state.metrics.webhook_requests_total.inc();

    match state.verifier.verify(&params) {
        Ok(challenge) => {
            info!("Subscription handshake verified");
            Json(VerificationResponse {
                challenge: challenge.to_string(),
            })
            .into_response()
        }
        Err(e) => {
            state.metrics.verification_failures_total.inc();
            warn!(error = %e, "Subscription handshake rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Event delivery
///
/// Always acknowledges. The body is handed to the dispatch pool without
/// inspection; parse errors, unknown owners and handler failures surface
/// only in logs, metrics and the dead-letter store. A body over
/// `server.max_body_size` is acknowledged and dropped.
#[instrument(skip_all, fields(event_id))]
async fn handle_event_delivery(
    State(state): State<AppState>,
    body: Body,
) -> (StatusCode, &'static str) {
    let event_id = EventId::new();
    tracing::Span::current().record("event_id", tracing::field::display(event_id));

    state.metrics.webhook_requests_total.inc();
    state.metrics.events_acknowledged_total.inc();

    // Read by hand: the `Bytes` extractor would answer 413 instead.
    let limit = state.config.server.max_body_size;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            state.metrics.payloads_dropped_total.inc();
            warn!(limit, error = %e, "Dropping event delivery body over the size limit");
            return (StatusCode::OK, EVENT_RECEIVED);
        }
    };

    debug!(size = body.len(), "Webhook event received");

    // Rejections are dead-lettered by the pool; the sender still gets its ack.
    let _ = state
        .pool
        .submit_or_dead_letter(DispatchJob::raw(event_id, body, Timestamp::now()));

    (StatusCode::OK, EVENT_RECEIVED)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Not ready once shutdown has begun.
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    if !state.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(ReadinessResponse {
        ready: true,
        timestamp: Timestamp::now(),
    }))
}

// ============================================================================
// Observability Handlers
// ============================================================================

async fn metrics_endpoint() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode_to_string(&metric_families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Admin Handlers
// ============================================================================

/// List dead-lettered events, newest first
#[instrument(skip_all)]
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterListParams>,
) -> Result<Json<DeadLetterListResponse>, AdminError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .min(MAX_DEAD_LETTER_LIMIT);

    let records = state.dead_letters.list(limit).await?;
    Ok(Json(DeadLetterListResponse {
        count: records.len(),
        records,
    }))
}

/// Resubmit a dead-lettered event to the dispatch pool
///
/// The record is removed before submission so a renewed failure can write a
/// fresh record under the same id; it is put back if the pool rejects it.
#[instrument(skip_all, fields(event_id = %event_id))]
async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<ReplayResponse>), AdminError> {
    let parsed: EventId = event_id
        .parse()
        .map_err(|_| AdminError::InvalidEventId {
            value: event_id.clone(),
        })?;

    let record = state
        .dead_letters
        .get(&parsed)
        .await?
        .ok_or_else(|| AdminError::NotFound {
            event_id: event_id.clone(),
        })?;

    if state.pool.is_draining() {
        return Err(AdminError::Dispatch(DispatchError::ShuttingDown));
    }

    state.dead_letters.remove(&parsed).await?;

    if let Err(e) = state.pool.submit(DispatchJob::from_dead_letter(&record)) {
        restore_dead_letter(state.dead_letters.as_ref(), record).await;
        return Err(e.into());
    }

    state.metrics.replay_operations_total.inc();
    info!(reason = record.reason.label(), "Dead-lettered event resubmitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(ReplayResponse {
            event_id,
            status: "queued".to_string(),
        }),
    ))
}

async fn restore_dead_letter(store: &dyn DeadLetterStore, record: DeadLetterRecord) {
    let event_id = record.event_id;
    if let Err(e) = store.store(record).await {
        error!(
            event_id = %event_id,
            error = %e,
            "Replay was rejected and the dead-letter record could not be restored"
        );
    }
}

async fn get_dispatch_stats(State(state): State<AppState>) -> Json<DispatchStats> {
    Json(state.pool.stats())
}

// ============================================================================
// Middleware
// ============================================================================

/// Correlation-id propagation and status-aware request logging
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let response = next.run(request).await;

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration
        .observe(start.elapsed().as_secs_f64());

    response
}

// ============================================================================
// Response Types
// ============================================================================

/// Handshake success body
#[derive(Debug, Serialize, Deserialize)]
pub struct VerificationResponse {
    #[serde(rename = "hub.challenge")]
    pub challenge: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterListResponse {
    pub records: Vec<DeadLetterRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub event_id: String,
    pub status: String,
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
