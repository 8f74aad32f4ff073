//! Tests for the Strava API client.

use super::*;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> StravaClient {
    let config = ClientConfig::default()
        .with_api_base_url(server.uri())
        .with_oauth_token_url(format!("{}/oauth/token", server.uri()))
        .with_client_credentials("12345", "client-secret");

    StravaClient::builder().config(config).build().unwrap()
}

fn activity_body(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "athlete": { "id": 134815 },
        "name": "Morning Ride",
        "sport_type": "Ride",
        "start_date": "2024-05-01T06:30:00Z",
        "distance": 28099.0,
        "moving_time": 4207,
        "elapsed_time": 4410,
        "total_elevation_gain": 516.0,
        "private": false,
        "segment_efforts": []
    })
}

#[tokio::test]
async fn test_get_activity_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities/987"))
        .and(header("authorization", "Bearer access-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(activity_body(987)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let activity = client.get_activity("access-abc", 987).await.unwrap();

    assert_eq!(activity.id, 987);
    assert_eq!(activity.athlete.id, 134815);
    assert_eq!(activity.name, "Morning Ride");
    assert_eq!(activity.sport_type, "Ride");
    assert_eq!(activity.moving_time, 4207);
    assert!(activity.average_heartrate.is_none());
}

#[tokio::test]
async fn test_get_activity_maps_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities/1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Record Not Found"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client.get_activity("token", 1).await.unwrap_err();

    assert!(matches!(error, ApiError::NotFound));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn test_get_activity_maps_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities/1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client.get_activity("expired", 1).await.unwrap_err();

    assert!(matches!(error, ApiError::AuthenticationFailed));
}

#[tokio::test]
async fn test_get_activity_maps_rate_limit_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities/1"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-ratelimit-limit", "200,2000")
                .insert_header("x-ratelimit-usage", "201,900"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client.get_activity("token", 1).await.unwrap_err();

    assert!(error.is_transient());
    let retry_after = error.retry_after().expect("rate limit should carry retry_after");
    assert!(retry_after <= Duration::from_secs(900));
}

#[tokio::test]
async fn test_get_activity_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/activities/1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client.get_activity("token", 1).await.unwrap_err();

    match &error {
        ApiError::HttpError { status, message } => {
            assert_eq!(*status, 502);
            assert_eq!(message, "bad gateway");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_refresh_token_posts_refresh_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .and(body_string_contains("client_id=12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_at": 1_900_000_000,
            "expires_in": 21600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let tokens = client.refresh_token("old-refresh").await.unwrap();

    assert_eq!(tokens.access_token(), "new-access");
    assert_eq!(tokens.refresh_token(), "new-refresh");
    assert_eq!(tokens.expires_at().timestamp(), 1_900_000_000);
}

#[tokio::test]
async fn test_refresh_token_requires_client_credentials() {
    let config = ClientConfig::default();
    let client = StravaClient::builder().config(config).build().unwrap();

    let error = client.refresh_token("refresh").await.unwrap_err();
    assert!(matches!(error, ApiError::Configuration { .. }));
}

#[test]
fn test_builder_rejects_invalid_base_url() {
    let config = ClientConfig::default().with_api_base_url("not a url");
    let result = StravaClient::builder().config(config).build();

    assert!(matches!(result, Err(ApiError::Configuration { .. })));
}

#[test]
fn test_config_debug_redacts_secret() {
    let config = ClientConfig::default().with_client_credentials("12345", "top-secret");
    let debug = format!("{:?}", config);

    assert!(debug.contains("12345"));
    assert!(!debug.contains("top-secret"));
}
