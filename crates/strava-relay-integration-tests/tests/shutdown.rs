//! Integration tests for readiness and draining on shutdown

mod common;

use axum::http::StatusCode;
use common::{activity_event, body_string, TestHarness, KNOWN_OWNER};
use std::time::Duration;
use strava_relay_core::DeadLetterStore;

#[tokio::test]
async fn test_queued_events_finish_before_shutdown_returns() {
    let harness = TestHarness::new();
    harness.source.set_delay(Duration::from_millis(20));

    for activity_id in 1..=5 {
        harness
            .post_event(activity_event("create", KNOWN_OWNER, activity_id, 1516126040))
            .await;
    }

    assert!(harness.state.pool.shutdown(Duration::from_secs(5)).await);
    assert_eq!(harness.source.fetch_count(), 5);
    assert_eq!(harness.activities.len(), 5);
}

#[tokio::test]
async fn test_not_ready_while_draining() {
    let harness = TestHarness::new();
    assert_eq!(harness.get("/ready").await.status(), StatusCode::OK);

    harness.state.pool.shutdown(Duration::from_secs(1)).await;

    assert_eq!(
        harness.get("/ready").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(harness.get("/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_late_delivery_is_acknowledged_and_kept_for_replay() {
    let harness = TestHarness::new();
    harness.state.pool.shutdown(Duration::from_secs(1)).await;

    let response = harness
        .post_event(activity_event("create", KNOWN_OWNER, 7, 1516126040))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "EVENT_RECEIVED");

    for _ in 0..100 {
        if !harness.dead_letters.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records = harness.dead_letters.list(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason.label(), "overloaded");
    assert_eq!(harness.source.fetch_count(), 0);
}
