//! Cache and validator against a live key service: fetch, rotation pickup,
//! and overlap windows as seen from a consumer.

use chrono::Duration as ChronoDuration;
use ks_cache::cache::{HealthStatus, KeyDistributionCache, KeySource};
use ks_cache::config::CacheConfig;
use ks_cache::errors::CacheError;
use ks_cache::validator::JwtValidator;
use ks_service::models::Actor;
use ks_test_utils::{TestKeyServer, TestServerOptions};
use std::sync::Arc;
use std::time::Duration;

fn cache_for(server: &TestKeyServer) -> Result<Arc<KeyDistributionCache>, anyhow::Error> {
    let config = CacheConfig::new(server.jwks_url())
        .with_ttl(Duration::from_secs(60))
        .with_refresh_interval(Duration::from_secs(30))
        .with_http_timeout(Duration::from_secs(1))
        .with_startup_timeout(Duration::from_secs(2))
        .with_initial_backoff(Duration::from_millis(10));
    Ok(Arc::new(KeyDistributionCache::new(config)?))
}

fn now_of(server: &TestKeyServer) -> i64 {
    server.manager().now().timestamp()
}

#[tokio::test]
async fn test_cache_serves_authority_keys() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let active = server.manager().resolver().signing_key().await?;
    let cache = cache_for(&server)?;

    // Act
    let keys = cache.get().await?;

    // Assert
    assert_eq!(keys.source, KeySource::Distribution);
    assert_eq!(keys.jwks.key_ids(), vec![active.key_id.as_str()]);

    let health = cache.health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.key_count, 1);

    Ok(())
}

#[tokio::test]
async fn test_validator_accepts_authority_signed_token() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let validator = JwtValidator::new(cache_for(&server)?);
    let token = server.sign_token("svc-gateway").await?;

    let claims = validator.validate_at(&token, now_of(&server)).await?;

    assert_eq!(claims.sub, "svc-gateway");
    Ok(())
}

/// A rotation between scheduled refreshes is picked up on the first token
/// carrying the new `kid`.
#[tokio::test]
async fn test_rotated_key_is_picked_up_on_kid_miss() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let cache = cache_for(&server)?;
    let validator = JwtValidator::new(Arc::clone(&cache));
    let old_token = server.sign_token("svc-a").await?;
    validator.validate_at(&old_token, now_of(&server)).await?;

    // Act
    server.clock().advance(ChronoDuration::minutes(5));
    let outcome = server.manager().rotate_now(Actor::Admin("ops".into())).await?;
    let new_token = server.sign_token("svc-a").await?;

    // Assert
    validator.validate_at(&new_token, now_of(&server)).await?;
    validator.validate_at(&old_token, now_of(&server)).await?;

    let keys = cache.snapshot().await.ok_or_else(|| anyhow::anyhow!("cache empty"))?;
    assert!(keys.find(&outcome.new_key_id).is_some());
    assert_eq!(keys.jwks.len(), 2, "Superseded key stays published during overlap");

    Ok(())
}

/// Tokens signed by the superseded key verify until the overlap ends, even
/// from a key set fetched before the overlap ended.
#[tokio::test]
async fn test_overlap_window_is_honoured_from_cached_keys() -> Result<(), anyhow::Error> {
    // Arrange
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_overlap(ChronoDuration::hours(1)))
            .await?;
    let cache = cache_for(&server)?;
    let validator = JwtValidator::new(Arc::clone(&cache));
    let old_token = server.sign_token("svc-a").await?;

    server.manager().rotate_now(Actor::System).await?;
    cache.refresh_once().await?;
    let rotated_at = server.manager().now();

    // Act / Assert
    let within = (rotated_at + ChronoDuration::minutes(59)).timestamp();
    assert!(validator.validate_at(&old_token, within).await.is_ok());

    let after = (rotated_at + ChronoDuration::minutes(61)).timestamp();
    let result = validator.validate_at(&old_token, after).await;
    assert!(matches!(result, Err(CacheError::InvalidToken(_))));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_validations_share_one_cold_fetch() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let validator = Arc::new(JwtValidator::new(cache_for(&server)?));
    let token = server.sign_token("svc-burst").await?;
    let now = now_of(&server);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate_at(&token, now).await.is_ok() })
        })
        .collect();

    for task in tasks {
        assert!(task.await?);
    }
    Ok(())
}
