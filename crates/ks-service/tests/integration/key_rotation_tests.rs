//! Integration tests for manual and scheduled key rotation over HTTP.

use chrono::Duration;
use common::jwks::Jwks;
use common::jwt::extract_kid;
use ks_service::handlers::rotation_handler::ACTOR_HEADER;
use ks_service::models::{Actor, RotationStatus, REASON_MANUAL, REASON_TIME_INTERVAL};
use ks_service::services::rotation_manager::TickOutcome;
use ks_test_utils::{TestKeyServer, TestServerOptions};
use reqwest::StatusCode;

async fn fetch_jwks(server: &TestKeyServer) -> Result<Jwks, anyhow::Error> {
    Ok(reqwest::get(server.jwks_url()).await?.json().await?)
}

#[tokio::test]
async fn test_manual_rotation_returns_new_key_id() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let before = server.manager().resolver().signing_key().await?;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .post(format!("{}/internal/rotate-keys", server.url()))
        .header(ACTOR_HEADER, "ops-oncall")
        .send()
        .await?;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["rotated"].as_bool(), Some(true));
    assert_eq!(body["old_key_id"].as_str(), Some(before.key_id.as_str()));

    let new_key_id = body["new_key_id"].as_str().unwrap_or_default();
    assert_ne!(new_key_id, before.key_id, "Rotation must mint a new key ID");

    let after = server.manager().resolver().signing_key().await?;
    assert_eq!(after.key_id, new_key_id);

    let events = server.audit().events();
    let last = events.last().expect("rotation should be audited");
    assert!(last.success);
    assert_eq!(last.actor, Actor::Admin("ops-oncall".to_string()));
    assert_eq!(last.reason, REASON_MANUAL);
    assert_eq!(last.key_id.as_deref(), Some(new_key_id));

    Ok(())
}

#[tokio::test]
async fn test_manual_rotation_without_actor_header_uses_default_identity() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}/internal/rotate-keys", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let events = server.audit().events();
    assert_eq!(
        events.last().map(|e| e.actor.clone()),
        Some(Actor::Admin("admin".to_string()))
    );

    Ok(())
}

/// An old token verifies inside the overlap window and fails after it.
///
/// overlap = 60m, rotation at T, token issued at T - 1m.
#[tokio::test]
async fn test_old_token_valid_only_inside_overlap_window() -> Result<(), anyhow::Error> {
    // Arrange
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_overlap(Duration::minutes(60)))
            .await?;
    let old_token = server.sign_token("svc-before-rotation").await?;

    server.clock().advance(Duration::minutes(1));
    let rotated_at = server.manager().now();
    server.manager().rotate_now(Actor::System).await?;
    let resolver = server.manager().resolver();

    // Act + Assert
    let during = resolver
        .verify_token(&old_token, rotated_at + Duration::minutes(59))
        .await;
    assert!(during.is_ok(), "Old token must verify at T+59m: {:?}", during.err());

    let after = resolver
        .verify_token(&old_token, rotated_at + Duration::minutes(61))
        .await;
    assert!(after.is_err(), "Old token must fail at T+61m");

    Ok(())
}

#[tokio::test]
async fn test_jwks_drops_superseded_key_after_overlap() -> Result<(), anyhow::Error> {
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_overlap(Duration::minutes(60)))
            .await?;
    let old_key = server.manager().resolver().signing_key().await?;
    let outcome = server.manager().rotate_now(Actor::System).await?;

    server.clock().advance(Duration::minutes(59));
    let during = fetch_jwks(&server).await?;
    assert_eq!(during.key_ids(), vec![outcome.new_key_id.as_str(), old_key.key_id.as_str()]);
    assert!(
        during.find(&old_key.key_id).and_then(|k| k.expires_at.clone()).is_some(),
        "Superseded key should advertise when it leaves the set"
    );

    server.clock().advance(Duration::minutes(2));
    let after = fetch_jwks(&server).await?;
    assert_eq!(after.key_ids(), vec![outcome.new_key_id.as_str()]);

    Ok(())
}

#[tokio::test]
async fn test_new_tokens_are_signed_with_new_key() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let outcome = server.manager().rotate_now(Actor::System).await?;

    let token = server.sign_token("svc-after-rotation").await?;

    assert_eq!(extract_kid(&token)?, outcome.new_key_id);
    let claims = server
        .manager()
        .resolver()
        .verify_token(&token, server.manager().now())
        .await?;
    assert_eq!(claims.sub, "svc-after-rotation");

    Ok(())
}

#[tokio::test]
async fn test_scheduled_tick_rotates_once_interval_elapses() -> Result<(), anyhow::Error> {
    // Arrange
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_interval(Duration::hours(24)))
            .await?;
    let initial = server.manager().resolver().signing_key().await?;

    // Act + Assert
    server.clock().advance(Duration::hours(23));
    assert_eq!(server.manager().tick().await?, TickOutcome::NotDue);

    server.clock().advance(Duration::hours(1));
    let TickOutcome::Rotated(outcome) = server.manager().tick().await? else {
        panic!("Tick should rotate once the interval has elapsed");
    };
    assert_eq!(outcome.previous_key_id.as_deref(), Some(initial.key_id.as_str()));

    let events = server.audit().events();
    let last = events.last().expect("scheduled rotation should be audited");
    assert_eq!(last.actor, Actor::System);
    assert_eq!(last.reason, REASON_TIME_INTERVAL);

    // The interval restarts from the rotation.
    assert_eq!(server.manager().tick().await?, TickOutcome::NotDue);

    Ok(())
}

#[tokio::test]
async fn test_rotation_status_endpoint_reports_schedule() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let start = server.manager().now();
    server.clock().advance(Duration::hours(36));

    let status: RotationStatus = reqwest::get(format!("{}/internal/rotation-status", server.url()))
        .await?
        .json()
        .await?;

    assert!(status.enabled);
    assert_eq!(status.last_rotation_at, Some(start));
    assert_eq!(status.next_rotation_due, Some(start + Duration::hours(168)));
    assert_eq!(status.days_since_last_rotation, Some(1.5));
    assert_eq!(status.verification_key_count, 1);
    assert!(status.current_key_id.is_some());

    Ok(())
}

#[tokio::test]
async fn test_es256_server_rotates_and_verifies() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn_with(
        TestServerOptions::default().with_algorithm(ks_service::models::SigningAlgorithm::Es256),
    )
    .await?;
    let token = server.sign_token("svc-ec").await?;
    server.manager().rotate_now(Actor::System).await?;

    let jwks = fetch_jwks(&server).await?;
    assert_eq!(jwks.len(), 2);
    assert!(jwks.keys.iter().all(|k| k.kty == "EC"));

    let claims = server
        .manager()
        .resolver()
        .verify_token(&token, server.manager().now())
        .await?;
    assert_eq!(claims.sub, "svc-ec");

    Ok(())
}
