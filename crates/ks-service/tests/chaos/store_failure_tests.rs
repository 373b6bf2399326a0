//! Chaos tests for generation and key store failures during rotation
//!
//! Every failure inside a rotation must leave the previous signing key
//! active and verifiable, and must be audited.

use chrono::Duration as ChronoDuration;
use ks_service::models::{Actor, RotationState};
use ks_service::repositories::mock::FaultInjectingStore;
use ks_service::repositories::{InMemoryKeyStore, KeyStore};
use ks_service::services::key_generator::mock::FailingKeyGenerator;
use ks_service::services::key_generator::{KeyGenerator, RingKeyGenerator};
use ks_service::services::rotation_manager::TickOutcome;
use ks_test_utils::{test_master_secret, TestKeyServer, TestServerOptions, TEST_CLUSTER};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Generation fails on a scheduled tick: `last_rotation_at` stays put, the
/// next tick retries, and the old key keeps working throughout.
#[tokio::test]
async fn test_generation_failure_on_tick_retries_next_tick() -> Result<(), anyhow::Error> {
    // Arrange
    let failing = Arc::new(FailingKeyGenerator::new(
        RingKeyGenerator::new(TEST_CLUSTER, &test_master_secret()),
        0,
    ));
    let generator: Arc<dyn KeyGenerator> = failing.clone();
    let server = TestKeyServer::spawn_with(
        TestServerOptions::default()
            .with_interval(ChronoDuration::hours(24))
            .with_generator(generator),
    )
    .await?;
    let original = server.manager().resolver().signing_key().await?;
    let token = server.sign_token("svc-steady").await?;
    let last_before = server.manager().status().await?.last_rotation_at;

    // Act: first due tick hits an entropy failure
    server.clock().advance(ChronoDuration::hours(25));
    failing.set_failures(1);
    let failed = server.manager().tick().await;

    // Assert
    assert!(failed.is_err(), "Tick should surface the generation failure");
    let status = server.manager().status().await?;
    assert_eq!(status.last_rotation_at, last_before, "last_rotation_at must not move");
    assert_eq!(status.current_key_id.as_deref(), Some(original.key_id.as_str()));
    assert!(server
        .manager()
        .resolver()
        .verify_token(&token, server.manager().now())
        .await
        .is_ok());

    let failures = server.audit().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures.first().and_then(|e| e.previous_key_id.clone()), Some(original.key_id.clone()));

    // Next tick retries and succeeds.
    let TickOutcome::Rotated(outcome) = server.manager().tick().await? else {
        panic!("Next tick should retry the rotation");
    };
    assert_eq!(outcome.previous_key_id.as_deref(), Some(original.key_id.as_str()));
    assert!(server
        .manager()
        .resolver()
        .verify_token(&token, server.manager().now())
        .await
        .is_ok());

    Ok(())
}

#[tokio::test]
async fn test_generation_failure_over_http_is_500_and_key_unchanged() -> Result<(), anyhow::Error> {
    let failing = Arc::new(FailingKeyGenerator::new(
        RingKeyGenerator::new(TEST_CLUSTER, &test_master_secret()),
        0,
    ));
    let generator: Arc<dyn KeyGenerator> = failing.clone();
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_generator(generator)).await?;
    let original = server.manager().resolver().signing_key().await?;

    failing.set_failures(1);
    let response = reqwest::Client::new()
        .post(format!("{}/internal/rotate-keys", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "GENERATION_ERROR");
    assert!(!body.to_string().contains("entropy"), "Internals must not leak");

    let current = server.manager().resolver().signing_key().await?;
    assert_eq!(current.key_id, original.key_id);

    Ok(())
}

#[tokio::test]
async fn test_persistence_failure_keeps_previous_key_active() -> Result<(), anyhow::Error> {
    // Arrange
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    let store: Arc<dyn KeyStore> = faulty.clone();
    let server = TestKeyServer::spawn_with(TestServerOptions::default().with_store(store)).await?;
    let original = server.manager().resolver().signing_key().await?;

    // Act
    faulty.fail_rotate(true);
    let result = server.manager().rotate_now(Actor::Admin("ops".into())).await;

    // Assert
    assert!(result.is_err());
    let all = server.store().load_all().await?;
    assert_eq!(all.len(), 1, "No partial key record is visible");
    assert_eq!(
        server.manager().resolver().signing_key().await?.key_id,
        original.key_id
    );
    assert_eq!(server.audit().failures().len(), 1);

    // Recovery once the store is healthy again.
    faulty.fail_rotate(false);
    server.manager().rotate_now(Actor::Admin("ops".into())).await?;
    assert_eq!(server.store().load_all().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_config_save_failure_still_reports_success() -> Result<(), anyhow::Error> {
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    let store: Arc<dyn KeyStore> = faulty.clone();
    let server = TestKeyServer::spawn_with(TestServerOptions::default().with_store(store)).await?;
    let last_before = server.manager().status().await?.last_rotation_at;

    faulty.fail_save_config(true);
    server.clock().advance(ChronoDuration::hours(1));
    let outcome = server.manager().rotate_now(Actor::System).await?;

    let status = server.manager().status().await?;
    assert_eq!(status.current_key_id.as_deref(), Some(outcome.new_key_id.as_str()));
    assert_eq!(status.last_rotation_at, last_before, "Scheduling hint was not saved");

    Ok(())
}

/// A hung store call is cut off by the store timeout and the manager
/// returns to `Idle`.
#[tokio::test]
async fn test_hung_store_is_bounded_by_timeout() -> Result<(), anyhow::Error> {
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    let store: Arc<dyn KeyStore> = faulty.clone();
    let options = TestServerOptions {
        store_timeout: Duration::from_millis(100),
        ..TestServerOptions::default()
    }
    .with_store(store);
    let server = TestKeyServer::spawn_with(options).await?;
    let original = server.manager().resolver().signing_key().await?;

    faulty.delay_rotate(Duration::from_secs(5));
    let result = server.manager().rotate_now(Actor::System).await;

    assert!(matches!(result, Err(ks_service::errors::KsError::Persistence(_))));
    assert_eq!(server.manager().state(), RotationState::Idle);
    assert_eq!(
        server.manager().resolver().signing_key().await?.key_id,
        original.key_id
    );

    Ok(())
}
