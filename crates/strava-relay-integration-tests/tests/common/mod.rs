//! Common test utilities for strava-relay-api integration tests
//!
//! This module provides:
//! - A fake Strava activity source that records fetches
//! - A harness wiring real handlers, in-memory stores and the dispatch pool
//!   behind the HTTP router
//! - Webhook payload builders

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use strava_client::{ActivityAthlete, StravaActivity, TokenSet};
use strava_relay_api::{
    create_router, AppState, DispatchConfig, DispatchPool, SecretString, ServiceConfig,
    ServiceMetrics,
};
use strava_relay_core::{
    ActivitySource, Dispatcher, ExternalObjectId, ExternalOwnerId, InMemoryActivityStore,
    InMemoryCredentialStore, InMemoryDeadLetterStore, InMemoryEventLedger,
    InMemoryIdentityStore, RetryPolicy, StoreBackedHandlers, UpstreamError, UserId,
};
use tower::ServiceExt;

pub const VERIFY_TOKEN: &str = "STRAVA";
pub const KNOWN_OWNER: u64 = 134815;
pub const UNKNOWN_OWNER: u64 = 999999;

// ============================================================================
// Fake activity source
// ============================================================================

/// Activity source that records every fetch and can be slowed down
#[derive(Default)]
pub struct FakeActivitySource {
    fetches: Mutex<Vec<(UserId, ExternalObjectId)>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeActivitySource {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetches(&self) -> Vec<(UserId, ExternalObjectId)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl ActivitySource for FakeActivitySource {
    async fn fetch_activity(
        &self,
        user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<StravaActivity, UpstreamError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.fetches
            .lock()
            .unwrap()
            .push((user_id.clone(), activity_id.clone()));

        Ok(StravaActivity {
            id: activity_id.as_u64().unwrap_or_default(),
            athlete: ActivityAthlete { id: KNOWN_OWNER },
            name: "Morning Ride".to_string(),
            sport_type: "Ride".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap(),
            distance: 42_195.0,
            moving_time: 5400,
            elapsed_time: 5700,
            total_elevation_gain: 410.0,
            average_heartrate: Some(141.5),
            description: None,
            private: false,
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Prometheus rejects duplicate registrations on the global registry, so
/// every test in a binary shares one [`ServiceMetrics`].
static TEST_METRICS: OnceLock<Arc<ServiceMetrics>> = OnceLock::new();

pub fn test_metrics() -> Arc<ServiceMetrics> {
    TEST_METRICS
        .get_or_init(|| ServiceMetrics::new().expect("ServiceMetrics::new must succeed in tests"))
        .clone()
}

/// Real handlers and dispatcher over in-memory stores
pub struct TestHarness {
    pub state: AppState,
    pub source: Arc<FakeActivitySource>,
    pub identities: InMemoryIdentityStore,
    pub credentials: InMemoryCredentialStore,
    pub activities: InMemoryActivityStore,
    pub dead_letters: InMemoryDeadLetterStore,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_dispatch(DispatchConfig::default())
    }

    pub fn with_dispatch(dispatch: DispatchConfig) -> Self {
        let mut config = ServiceConfig::default();
        config.strava.verify_token = SecretString::new(VERIFY_TOKEN);
        config.dispatch = dispatch;

        let source = Arc::new(FakeActivitySource::default());
        let identities = InMemoryIdentityStore::new();
        let credentials = InMemoryCredentialStore::new();
        let activities = InMemoryActivityStore::new();
        let dead_letters = InMemoryDeadLetterStore::new();

        identities.link(ExternalOwnerId::from(KNOWN_OWNER), known_user());
        credentials.insert(
            known_user(),
            TokenSet::new("access", "refresh", Utc::now() + chrono::Duration::hours(6)),
        );

        let handlers = StoreBackedHandlers::new(
            source.clone(),
            Arc::new(activities.clone()),
            Arc::new(credentials.clone()),
        );

        let dispatcher = Dispatcher::new(
            Arc::new(identities.clone()),
            Arc::new(handlers),
            Arc::new(InMemoryEventLedger::new()),
            Arc::new(dead_letters.clone()),
        )
        .with_retry_policy(
            RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50))
                .without_jitter(),
        );

        let pool = DispatchPool::start(Arc::new(dispatcher), &config.dispatch, None);
        let state = AppState::new(
            config,
            pool,
            Arc::new(dead_letters.clone()),
            test_metrics(),
        );

        Self {
            state,
            source,
            identities,
            credentials,
            activities,
            dead_letters,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        create_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_event(&self, body: impl Into<Body>) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
    }

    /// Wait until the pool has finished `count` events in total.
    pub async fn wait_for_outcomes(&self, count: u64) {
        for _ in 0..500 {
            let stats = self.state.pool.stats();
            if stats.processed + stats.skipped + stats.failed >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} outcomes, pool stats: {:?}",
            count,
            self.state.pool.stats()
        );
    }
}

pub fn known_user() -> UserId {
    UserId::new("user-1").unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Payload builders
// ============================================================================

pub fn activity_event(aspect: &str, owner_id: u64, object_id: u64, event_time: i64) -> String {
    json!({
        "aspect_type": aspect,
        "event_time": event_time,
        "object_id": object_id,
        "object_type": "activity",
        "owner_id": owner_id,
        "subscription_id": 120475,
        "updates": {}
    })
    .to_string()
}

pub fn athlete_update(owner_id: u64, updates: serde_json::Value) -> String {
    json!({
        "aspect_type": "update",
        "event_time": 1516126040,
        "object_id": owner_id,
        "object_type": "athlete",
        "owner_id": owner_id,
        "subscription_id": 120475,
        "updates": updates
    })
    .to_string()
}
