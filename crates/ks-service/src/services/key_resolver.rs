use crate::crypto;
use crate::errors::KsError;
use crate::models::KeyRecord;
use crate::repositories::KeyStore;
use crate::services::bounded;
use chrono::{DateTime, Utc};
use common::jwks::Jwks;
use common::jwt::{self, TokenClaims, DEFAULT_CLOCK_SKEW};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Answers "which keys are valid now" straight from the key store.
///
/// Nothing is cached here; every call projects the store at the given instant.
#[derive(Clone)]
pub struct ActiveKeyResolver {
    store: Arc<dyn KeyStore>,
    store_timeout: Duration,
}

impl ActiveKeyResolver {
    pub fn new(store: Arc<dyn KeyStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// The unique active record.
    pub async fn signing_key(&self) -> Result<KeyRecord, KsError> {
        bounded(self.store_timeout, "load_active", self.store.load_active())
            .await?
            .ok_or(KsError::NoActiveKey)
    }

    /// Active key first, then superseded keys still inside their overlap
    /// window, most recently rotated first.
    pub async fn verification_keys(&self, now: DateTime<Utc>) -> Result<Vec<KeyRecord>, KsError> {
        let mut keys: Vec<KeyRecord> = bounded(self.store_timeout, "load_all", self.store.load_all())
            .await?
            .into_iter()
            .filter(|k| k.is_verifiable_at(now))
            .collect();

        keys.sort_by(|a, b| {
            b.is_active
                .cmp(&a.is_active)
                .then_with(|| b.rotated_at.cmp(&a.rotated_at))
        });

        Ok(keys)
    }

    /// Public JWKS for the verification key set at `now`.
    pub async fn jwks(&self, now: DateTime<Utc>) -> Result<Jwks, KsError> {
        let keys = self
            .verification_keys(now)
            .await?
            .iter()
            .map(crypto::public_jwk)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Jwks { keys })
    }

    /// Verify a token against the verification key set at `now`.
    #[instrument(skip_all)]
    pub async fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, KsError> {
        let kid = jwt::extract_kid(token).map_err(|e| KsError::InvalidToken(e.to_string()))?;

        let keys = self.verification_keys(now).await?;
        let Some(record) = keys.iter().find(|k| k.key_id == kid) else {
            tracing::debug!(target: "ks.jwks", kid = %kid, "Token kid not in verification key set");
            return Err(KsError::InvalidToken(
                "The access token is invalid or expired".to_string(),
            ));
        };

        let jwk = crypto::public_jwk(record)?;
        jwt::verify_token_at(token, &jwk, now.timestamp(), DEFAULT_CLOCK_SKEW)
            .map_err(|e| KsError::InvalidToken(e.to_string()))
    }
}
