//! Token validation against the cached verification key set.
//!
//! Every rejection surfaces as `CacheError::InvalidToken` with the same
//! client-facing message; the reason is only logged at debug level.

use crate::cache::KeyDistributionCache;
use crate::errors::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::jwks::JsonWebKey;
use common::jwt::{
    extract_kid, verify_token_at, JwtValidationError, TokenClaims, DEFAULT_CLOCK_SKEW,
    MAX_CLOCK_SKEW,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Consulted after signature verification to reject otherwise-valid tokens.
#[async_trait]
pub trait RevocationChecker: Send + Sync {
    async fn is_revoked(&self, claims: &TokenClaims) -> Result<bool, CacheError>;
}

/// Accepts every token.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRevocation;

#[async_trait]
impl RevocationChecker for NoRevocation {
    async fn is_revoked(&self, _claims: &TokenClaims) -> Result<bool, CacheError> {
        Ok(false)
    }
}

pub struct JwtValidator {
    cache: Arc<KeyDistributionCache>,
    revocation: Arc<dyn RevocationChecker>,
    clock_skew: Duration,
}

impl JwtValidator {
    pub fn new(cache: Arc<KeyDistributionCache>) -> Self {
        Self {
            cache,
            revocation: Arc::new(NoRevocation),
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    #[must_use]
    pub fn with_revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = checker;
        self
    }

    /// Tolerance for `iat` in the future, capped at [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew.min(MAX_CLOCK_SKEW);
        self
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Validate `token` against the wall clock.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` - malformed, unknown `kid`, bad signature, expired,
    ///   retired key, or revoked
    /// - `NoKeysAvailable` / `DistributionUnavailable` - no key set to check against
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, CacheError> {
        self.validate_at(token, Utc::now().timestamp()).await
    }

    /// Validate `token` as of `now` (Unix seconds).
    #[instrument(skip_all)]
    pub async fn validate_at(&self, token: &str, now: i64) -> Result<TokenClaims, CacheError> {
        let kid = extract_kid(token).map_err(reject)?;
        let jwk = self.find_key(&kid).await?;

        if key_retired(&jwk, now) {
            tracing::debug!(target: "ks_cache.validator", kid = %kid, "Token rejected: signing key retired");
            return Err(CacheError::InvalidToken("signing key retired".to_string()));
        }

        let claims = verify_token_at(token, &jwk, now, self.clock_skew).map_err(reject)?;

        match self.revocation.is_revoked(&claims).await {
            Ok(false) => Ok(claims),
            Ok(true) => {
                tracing::debug!(target: "ks_cache.validator", kid = %kid, "Token rejected: revoked");
                Err(CacheError::InvalidToken("revoked".to_string()))
            }
            Err(e) => {
                tracing::warn!(target: "ks_cache.validator", error = %e, "Revocation check failed, rejecting token");
                Err(CacheError::InvalidToken("revocation check unavailable".to_string()))
            }
        }
    }

    /// Look `kid` up in the cache; on a miss, force one refresh (subject to
    /// the cooldown) and look again.
    async fn find_key(&self, kid: &str) -> Result<JsonWebKey, CacheError> {
        let keys = self.cache.get().await?;
        if let Some(jwk) = keys.find(kid) {
            return Ok(jwk.clone());
        }

        if self.cache.refresh_if_cooled_down().await {
            if let Some(jwk) = self
                .cache
                .snapshot()
                .await
                .and_then(|keys| keys.find(kid).cloned())
            {
                return Ok(jwk);
            }
        }

        tracing::debug!(target: "ks_cache.validator", kid = %kid, "Token rejected: unknown key id");
        Err(CacheError::InvalidToken("unknown key id".to_string()))
    }
}

fn reject(e: JwtValidationError) -> CacheError {
    tracing::debug!(target: "ks_cache.validator", error = ?e, "Token rejected");
    CacheError::InvalidToken(format!("{:?}", e))
}

/// A key carrying `expires_at` at or before `now` no longer verifies.
/// `now` is whole seconds; the comparison keeps the sub-second part of
/// `expires_at`. An unparseable instant counts as retired.
fn key_retired(jwk: &JsonWebKey, now: i64) -> bool {
    match jwk.expires_at.as_deref() {
        None => false,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(expires_at) => expires_at.timestamp_millis() <= now.saturating_mul(1000),
            Err(e) => {
                tracing::debug!(target: "ks_cache.validator", kid = %jwk.kid, error = %e, "Unparseable expires_at on JWK");
                true
            }
        },
    }
}

pub mod mock {
    //! Revocation checker double for tests.

    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Revokes tokens by `jti`; can be switched to fail every check.
    #[derive(Debug, Default)]
    pub struct RevokedJtis {
        revoked: Mutex<HashSet<String>>,
        fail: AtomicBool,
    }

    impl RevokedJtis {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn revoke(&self, jti: impl Into<String>) {
            if let Ok(mut revoked) = self.revoked.lock() {
                revoked.insert(jti.into());
            }
        }

        pub fn fail_checks(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RevocationChecker for RevokedJtis {
        async fn is_revoked(&self, claims: &TokenClaims) -> Result<bool, CacheError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::DistributionUnavailable(
                    "injected revocation failure".to_string(),
                ));
            }
            let Some(jti) = claims.jti.as_deref() else {
                return Ok(false);
            };
            Ok(self
                .revoked
                .lock()
                .map(|revoked| revoked.contains(jti))
                .unwrap_or(true))
        }
    }
}
