//! Distribution outages as seen by a consumer: serve-stale, static fallback
//! and health reporting.

use common::jwks::Jwks;
use ks_cache::cache::{HealthStatus, KeyDistributionCache, KeySource};
use ks_cache::config::CacheConfig;
use ks_cache::errors::CacheError;
use ks_cache::tasks::spawn_refresh_task;
use ks_cache::validator::JwtValidator;
use ks_test_utils::TestKeyServer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config_for(server: &TestKeyServer) -> CacheConfig {
    CacheConfig::new(server.jwks_url())
        .with_ttl(Duration::from_secs(60))
        .with_refresh_interval(Duration::from_secs(30))
        .with_http_timeout(Duration::from_millis(500))
        .with_startup_timeout(Duration::from_millis(300))
        .with_max_attempts(2)
        .with_initial_backoff(Duration::from_millis(10))
}

/// Endpoint down for three consecutive refresh cycles: the last good key
/// set is served unchanged and health reports degraded.
#[tokio::test]
async fn test_three_failed_cycles_serve_last_good_keys() -> Result<(), anyhow::Error> {
    // Arrange
    let mut server = TestKeyServer::spawn().await?;
    let cache = Arc::new(KeyDistributionCache::new(config_for(&server))?);
    let validator = JwtValidator::new(Arc::clone(&cache));
    let token = server.sign_token("svc-a").await?;
    let now = server.manager().now().timestamp();
    let before = cache.get().await?;

    // Act
    server.shutdown().await;
    for _ in 0..3 {
        assert!(cache.refresh_once().await.is_err());
    }

    // Assert
    let after = tokio::time::timeout(Duration::from_millis(100), cache.get()).await??;
    assert_eq!(after.jwks, before.jwks);
    assert_eq!(after.source, KeySource::Distribution);

    let health = cache.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.consecutive_failures, 3);
    assert!(health.last_error.is_some());

    validator.validate_at(&token, now).await?;

    Ok(())
}

#[tokio::test]
async fn test_static_fallback_used_when_authority_down_at_startup() -> Result<(), anyhow::Error> {
    // Arrange: capture the published set, then take the authority away.
    let mut server = TestKeyServer::spawn().await?;
    let published: Jwks = reqwest::get(server.jwks_url()).await?.json().await?;
    let token = server.sign_token("svc-a").await?;
    let now = server.manager().now().timestamp();
    let config = config_for(&server).with_static_fallback(published.clone());
    server.shutdown().await;

    // Act
    let cache = Arc::new(KeyDistributionCache::new(config)?);
    let keys = cache.get().await?;

    // Assert
    assert_eq!(keys.source, KeySource::StaticFallback);
    assert_eq!(keys.jwks, published);
    assert_eq!(cache.health().await.status, HealthStatus::Degraded);

    JwtValidator::new(cache).validate_at(&token, now).await?;

    Ok(())
}

#[tokio::test]
async fn test_no_authority_and_no_fallback_rejects_instead_of_accepting() -> Result<(), anyhow::Error> {
    let mut server = TestKeyServer::spawn().await?;
    let token = server.sign_token("svc-a").await?;
    let now = server.manager().now().timestamp();
    let config = config_for(&server);
    server.shutdown().await;

    let cache = Arc::new(KeyDistributionCache::new(config)?);
    let result = JwtValidator::new(Arc::clone(&cache)).validate_at(&token, now).await;

    assert!(matches!(result, Err(CacheError::NoKeysAvailable)));
    assert_eq!(cache.health().await.status, HealthStatus::Unhealthy);

    Ok(())
}

#[tokio::test]
async fn test_refresh_task_populates_cache_in_background() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let config = config_for(&server)
        .with_ttl(Duration::from_millis(400))
        .with_refresh_interval(Duration::from_millis(50));
    let cache = Arc::new(KeyDistributionCache::new(config)?);
    let active = server.manager().resolver().signing_key().await?;

    // Act
    let cancel = CancellationToken::new();
    let handle = spawn_refresh_task(Arc::clone(&cache), cancel.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;

    // Assert
    let keys = cache.snapshot().await.ok_or_else(|| anyhow::anyhow!("cache empty"))?;
    assert_eq!(keys.source, KeySource::Distribution);
    assert!(keys.find(&active.key_id).is_some());
    assert_eq!(cache.health().await.status, HealthStatus::Healthy);

    Ok(())
}
