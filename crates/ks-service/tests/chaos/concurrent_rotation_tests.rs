//! Chaos tests for key rotation under concurrent operations
//!
//! These tests validate that rotation stays exclusive while:
//! - Multiple manual rotations race each other
//! - A scheduled tick fires during a manual rotation
//! - JWKS readers hammer the distribution endpoint mid-rotation

use chrono::Duration as ChronoDuration;
use common::jwks::Jwks;
use futures::future::join_all;
use ks_service::models::{Actor, RotationState};
use ks_service::repositories::mock::FaultInjectingStore;
use ks_service::repositories::{InMemoryKeyStore, KeyStore};
use ks_service::services::rotation_manager::TickOutcome;
use ks_test_utils::{TestKeyServer, TestServerOptions};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a server whose `rotate` store call takes `delay`, so a rotation
/// holds the lock long enough for racing requests to collide with it.
async fn spawn_with_slow_rotate(
    delay: Duration,
) -> Result<(TestKeyServer, Arc<FaultInjectingStore>), anyhow::Error> {
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    faulty.delay_rotate(delay);
    let store: Arc<dyn KeyStore> = faulty.clone();
    let server = TestKeyServer::spawn_with(TestServerOptions::default().with_store(store)).await?;
    Ok((server, faulty))
}

async fn active_key_count(server: &TestKeyServer) -> Result<usize, anyhow::Error> {
    Ok(server
        .store()
        .load_all()
        .await?
        .iter()
        .filter(|k| k.is_active)
        .count())
}

/// Two manual rotations at the same time: one wins, the other gets 409.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_manual_rotations_are_exclusive() -> Result<(), anyhow::Error> {
    // Arrange
    let (server, _faulty) = spawn_with_slow_rotate(Duration::from_millis(500)).await?;
    let before = server.manager().resolver().signing_key().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/internal/rotate-keys", server.url());

    // Act
    let (first, second) = tokio::join!(
        client.post(&url).header("x-actor-id", "alice").send(),
        client.post(&url).header("x-actor-id", "bob").send(),
    );
    let mut statuses = vec![first?.status(), second?.status()];
    statuses.sort();

    // Assert
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(active_key_count(&server).await?, 1, "Never two active keys");

    let after = server.manager().resolver().signing_key().await?;
    assert_ne!(after.key_id, before.key_id);

    let all = server.store().load_all().await?;
    let old = all
        .iter()
        .find(|k| k.key_id == before.key_id)
        .expect("previous key kept");
    assert!(!old.is_active);
    assert!(old.expires_at.is_some(), "Previous key must be superseded, not lost");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflict_response_has_stable_error_code() -> Result<(), anyhow::Error> {
    let (server, _faulty) = spawn_with_slow_rotate(Duration::from_millis(500)).await?;
    let manager = Arc::clone(server.manager());

    let in_flight = tokio::spawn(async move { manager.rotate_now(Actor::System).await });
    while server.manager().state() != RotationState::Rotating {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = reqwest::Client::new()
        .post(format!("{}/internal/rotate-keys", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "ROTATION_IN_PROGRESS");

    in_flight.await??;
    assert_eq!(server.manager().state(), RotationState::Idle);

    Ok(())
}

/// A scheduled tick landing during a manual rotation skips instead of
/// interleaving.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tick_during_manual_rotation_is_busy() -> Result<(), anyhow::Error> {
    let (server, _faulty) = spawn_with_slow_rotate(Duration::from_millis(300)).await?;
    server.clock().advance(ChronoDuration::days(30));
    let manager = Arc::clone(server.manager());

    let manual = tokio::spawn(async move { manager.rotate_now(Actor::Admin("ops".into())).await });
    while server.manager().state() != RotationState::Rotating {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(server.manager().tick().await?, TickOutcome::Busy);

    manual.await??;
    assert_eq!(active_key_count(&server).await?, 1);

    // The manual rotation reset the interval, so the next tick has nothing to do.
    assert_eq!(server.manager().tick().await?, TickOutcome::NotDue);

    Ok(())
}

/// Many racing rotations: each one that succeeds mints a distinct key, and
/// the store never holds more than one active key.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_storm_keeps_single_active_key() -> Result<(), anyhow::Error> {
    let (server, _faulty) = spawn_with_slow_rotate(Duration::from_millis(20)).await?;

    let attempts = (0..16).map(|i| {
        let manager = Arc::clone(server.manager());
        tokio::spawn(async move { manager.rotate_now(Actor::Admin(format!("caller-{}", i))).await })
    });
    let results = join_all(attempts).await;

    let mut new_ids = Vec::new();
    for result in results {
        if let Ok(outcome) = result? {
            new_ids.push(outcome.new_key_id);
        }
    }

    assert!(!new_ids.is_empty(), "At least one rotation wins");
    let unique: std::collections::HashSet<_> = new_ids.iter().collect();
    assert_eq!(unique.len(), new_ids.len(), "Key IDs are never reused");
    assert_eq!(active_key_count(&server).await?, 1);

    Ok(())
}

/// JWKS readers never observe an empty or active-less key set mid-rotation.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jwks_reads_during_rotation_never_empty() -> Result<(), anyhow::Error> {
    let (server, _faulty) = spawn_with_slow_rotate(Duration::from_millis(100)).await?;
    let client = reqwest::Client::new();
    let jwks_url = server.jwks_url();

    let manager = Arc::clone(server.manager());
    let rotations = tokio::spawn(async move {
        for _ in 0..3 {
            manager.rotate_now(Actor::System).await?;
        }
        Ok::<_, ks_service::errors::KsError>(())
    });

    for _ in 0..40 {
        let jwks: Jwks = client.get(&jwks_url).send().await?.json().await?;
        assert!(!jwks.is_empty(), "JWKS must never be empty");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    rotations.await??;
    let jwks: Jwks = client.get(&jwks_url).send().await?.json().await?;
    assert_eq!(jwks.len(), 4, "Active key plus three superseded keys inside overlap");

    Ok(())
}
