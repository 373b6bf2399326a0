//! Integration tests for health endpoints
//!
//! `/health` is liveness; `/ready` requires a signing key and reports the
//! rotation manager's status.

use ks_service::repositories::mock::FaultInjectingStore;
use ks_service::repositories::{InMemoryKeyStore, KeyStore};
use ks_test_utils::{TestKeyServer, TestServerOptions};
use reqwest::StatusCode;
use std::sync::Arc;

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");

    Ok(())
}

#[tokio::test]
async fn test_ready_reports_rotation_status() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let active = server.manager().resolver().signing_key().await?;

    // Act
    let response = reqwest::get(format!("{}/ready", server.url())).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["rotation"]["current_key_id"], active.key_id.as_str());
    assert_eq!(body["rotation"]["enabled"], true);
    assert_eq!(body["rotation"]["state"], "idle");
    assert!(body.get("error").is_none());

    Ok(())
}

#[tokio::test]
async fn test_ready_returns_503_when_store_unreachable() -> Result<(), anyhow::Error> {
    // Arrange
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    let store: Arc<dyn KeyStore> = faulty.clone();
    let server = TestKeyServer::spawn_with(TestServerOptions::default().with_store(store)).await?;

    // Act
    faulty.fail_loads(true);
    let response = reqwest::get(format!("{}/ready", server.url())).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "not_ready");

    // Error message is generic; store details stay in the server log.
    let error = body["error"].as_str().unwrap_or_default();
    assert!(!error.contains("injected"), "Error leaked internals: {}", error);

    Ok(())
}

#[tokio::test]
async fn test_jwks_returns_500_with_generic_error_when_store_fails() -> Result<(), anyhow::Error> {
    let faulty = Arc::new(FaultInjectingStore::new(Arc::new(InMemoryKeyStore::new())));
    let store: Arc<dyn KeyStore> = faulty.clone();
    let server = TestKeyServer::spawn_with(TestServerOptions::default().with_store(store)).await?;

    faulty.fail_loads(true);
    let response = reqwest::get(server.jwks_url()).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "PERSISTENCE_ERROR");
    assert!(!body.to_string().contains("injected"));

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_served() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}
