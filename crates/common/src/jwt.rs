//! JWT utilities shared by the key service and its consumers.
//!
//! - Size limit checked before any parsing
//! - Clock skew constants for `iat` validation
//! - Key ID extraction from the JWT header (used to pick a key out of the
//!   verification key set)
//! - Token claims structure
//!
//! Error messages are intentionally generic; details go to debug logs.

use crate::jwks::JsonWebKey;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens above this size are rejected before base64 decoding or signature
/// verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for a configured clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT pre-validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a three-part JWT with a JSON header.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header has no usable `kid`.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Token `exp` is at or before the verification instant.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Signature or claims failed verification.
    #[error("The access token is invalid or expired")]
    InvalidSignature,

    /// The JWK cannot be used for EdDSA or ES256 verification.
    #[error("The access token is invalid or expired")]
    UnsupportedKey,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by tokens signed with a key-service signing key.
///
/// `sub` is redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Space-separated scopes.
    #[serde(default)]
    pub scope: String,

    /// Token identifier, consulted by revocation checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("scope", &self.scope)
            .field("jti", &self.jti)
            .finish()
    }
}

impl TokenClaims {
    /// Claims valid from `iat` for `lifetime`.
    #[must_use]
    pub fn new(sub: impl Into<String>, iat: i64, lifetime: Duration, scope: impl Into<String>) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let lifetime_secs = lifetime.as_secs() as i64;
        Self {
            sub: sub.into(),
            exp: iat.saturating_add(lifetime_secs),
            iat,
            scope: scope.into(),
            jti: None,
        }
    }

    /// Attach a token identifier.
    #[must_use]
    pub fn with_jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the `kid` from a JWT header without verifying the signature.
///
/// The returned value must only be used to look up a key in a trusted key
/// set; the token still has to be verified against that key.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - wrong structure, bad base64 or bad JSON header
/// - `MissingKid` - header has no non-empty string `kid`
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Validate the `iat` claim against an explicit `now`.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by configuration to MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Verify `token` against `jwk` as of `now` (Unix seconds).
///
/// Checks, in order: size, signature, `exp > now`, then `iat` against
/// `clock_skew`. Expiry is evaluated against the caller's instant rather
/// than the wall clock so that rotation windows can be exercised with a
/// controlled clock.
///
/// # Errors
///
/// Any [`JwtValidationError`]; all variants render the same client message.
pub fn verify_token_at(
    token: &str,
    jwk: &JsonWebKey,
    now: i64,
    clock_skew: Duration,
) -> Result<TokenClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return Err(JwtValidationError::TokenTooLarge);
    }

    let algorithm = jwk.algorithm()?;
    let decoding_key = jwk.decoding_key()?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.leeway = 0;

    let token_data = decode::<TokenClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "common.jwt", kid = %jwk.kid, error = %e, "Token verification failed");
        JwtValidationError::InvalidSignature
    })?;

    if token_data.claims.exp <= now {
        tracing::debug!(
            target: "common.jwt",
            exp = token_data.claims.exp,
            now = now,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    validate_iat_at(token_data.claims.iat, clock_skew, now)?;

    Ok(token_data.claims)
}

/// Encode raw bytes as unpadded base64url (JWK coordinate encoding).
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode an unpadded base64url JWK coordinate.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the input is not valid base64url.
pub fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value)
}

// =============================================================================
// Tests
// =============================================================================
