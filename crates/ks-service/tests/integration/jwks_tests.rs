//! Integration tests for the JWKS distribution endpoint.

use chrono::Duration;
use common::jwks::{Jwks, CRV_ED25519, KTY_OKP};
use common::jwt::{extract_kid, verify_token_at, DEFAULT_CLOCK_SKEW};
use common::secret::ExposeSecret;
use ks_service::crypto;
use ks_service::models::{Actor, SigningAlgorithm, REASON_MANUAL};
use ks_service::repositories::KeyStore;
use ks_service::services::key_generator::{KeyGenerator, RingKeyGenerator};
use ks_test_utils::{test_master_secret, TestKeyServer, TestServerOptions, TEST_CLUSTER};
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;

#[tokio::test]
async fn test_jwks_serves_active_key_with_cache_headers() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestKeyServer::spawn().await?;
    let active = server.manager().resolver().signing_key().await?;

    // Act
    let response = reqwest::get(server.jwks_url()).await?;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("max-age=3600")
    );

    let jwks: Jwks = response.json().await?;
    assert_eq!(jwks.key_ids(), vec![active.key_id.as_str()]);

    let jwk = jwks.find(&active.key_id).expect("active key in JWKS");
    assert_eq!(jwk.kty, KTY_OKP);
    assert_eq!(jwk.crv.as_deref(), Some(CRV_ED25519));
    assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
    assert_eq!(jwk.key_use.as_deref(), Some("sig"));
    assert!(jwk.expires_at.is_none(), "Active key has no expiry");

    Ok(())
}

#[tokio::test]
async fn test_jwks_never_exposes_private_material() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    server.manager().rotate_now(Actor::System).await?;

    let body: serde_json::Value = reqwest::get(server.jwks_url()).await?.json().await?;
    let keys = body["keys"].as_array().expect("keys array");

    assert_eq!(keys.len(), 2);
    for key in keys {
        assert!(key.get("d").is_none(), "JWKS must not contain private key component");
        assert!(key.get("private_key").is_none());
    }

    Ok(())
}

/// A consumer holding only the JWKS can verify a token minted by the service.
#[tokio::test]
async fn test_token_verifies_against_published_jwks() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let token = server.sign_token("svc-consumer").await?;

    let jwks: Jwks = reqwest::get(server.jwks_url()).await?.json().await?;
    let kid = extract_kid(&token)?;
    let jwk = jwks.find(&kid).expect("token kid published");

    let claims = verify_token_at(
        &token,
        jwk,
        server.manager().now().timestamp(),
        DEFAULT_CLOCK_SKEW,
    )?;
    assert_eq!(claims.sub, "svc-consumer");

    Ok(())
}

/// The verification key set stays non-empty across repeated rotations and
/// arbitrary clock jumps.
#[tokio::test]
async fn test_verification_set_never_empty() -> Result<(), anyhow::Error> {
    let server =
        TestKeyServer::spawn_with(TestServerOptions::default().with_overlap(Duration::minutes(5)))
            .await?;

    for step in 0..6 {
        server.manager().rotate_now(Actor::System).await?;
        server.clock().advance(Duration::hours(step * 10));

        let jwks: Jwks = reqwest::get(server.jwks_url()).await?.json().await?;
        assert!(!jwks.is_empty(), "JWKS empty after rotation {}", step);

        let active = server.manager().resolver().signing_key().await?;
        assert_eq!(
            jwks.key_ids().first().copied(),
            Some(active.key_id.as_str()),
            "Active key is listed first"
        );
    }

    Ok(())
}

/// Generate, persist, then `load_active` returns the same key ID and material.
#[tokio::test]
async fn test_generated_key_round_trips_through_store() -> Result<(), anyhow::Error> {
    let server = TestKeyServer::spawn().await?;
    let generator = RingKeyGenerator::new(TEST_CLUSTER, &test_master_secret());
    let previous = server.manager().resolver().signing_key().await?;

    let fresh = generator.generate(SigningAlgorithm::EdDsa, server.manager().now())?;
    server
        .store()
        .rotate(
            &fresh.activated(),
            &previous.superseded(server.manager().now(), Duration::hours(1), REASON_MANUAL),
        )
        .await?;

    let loaded = server
        .store()
        .load_active()
        .await?
        .expect("active key after rotate");
    assert_eq!(loaded.key_id, fresh.key_id);
    assert_eq!(loaded.public_key, fresh.public_key);
    assert_eq!(loaded.algorithm, fresh.algorithm);

    let master_key = test_master_secret();
    let original = crypto::decrypt_private_key(&fresh.private_key, &master_key)?;
    let reloaded = crypto::decrypt_private_key(&loaded.private_key, &master_key)?;
    assert_eq!(original.expose_secret(), reloaded.expose_secret());

    Ok(())
}
