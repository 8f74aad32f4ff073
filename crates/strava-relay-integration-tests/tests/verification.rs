//! Integration tests for the subscription handshake

mod common;

use axum::http::StatusCode;
use common::{body_string, TestHarness, VERIFY_TOKEN};

#[tokio::test]
async fn test_matching_token_echoes_challenge_unchanged() {
    let harness = TestHarness::new();
    let challenge = "15f7d1a91c1f40f8a748fd134752feb3";

    let response = harness
        .get(&format!(
            "/webhooks/strava?hub.verify_token={}&hub.challenge={}&hub.mode=subscribe",
            VERIFY_TOKEN, challenge
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["hub.challenge"], challenge);
}

#[tokio::test]
async fn test_mismatched_token_is_forbidden_without_challenge() {
    let harness = TestHarness::new();

    let response = harness
        .get("/webhooks/strava?hub.verify_token=guess&hub.challenge=secret-challenge&hub.mode=subscribe")
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.is_empty());
    assert!(!body.contains("secret-challenge"));
}

#[tokio::test]
async fn test_handshake_has_no_side_effects() {
    let harness = TestHarness::new();

    harness
        .get("/webhooks/strava?hub.verify_token=STRAVA&hub.challenge=abc&hub.mode=subscribe")
        .await;

    let stats = harness.state.pool.stats();
    assert_eq!(stats.submitted, 0);
    assert_eq!(harness.source.fetch_count(), 0);
}
