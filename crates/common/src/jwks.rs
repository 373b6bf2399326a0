//! JWKS (RFC 7517) wire format for the verification key set.
//!
//! The key service serves this document at `/.well-known/jwks.json`; the
//! consumer cache parses it. Only public material ever appears here.

use crate::jwt::{decode_b64url, encode_b64url, JwtValidationError};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};

/// Key type for Ed25519 keys (Octet Key Pair).
pub const KTY_OKP: &str = "OKP";

/// Key type for elliptic-curve keys.
pub const KTY_EC: &str = "EC";

pub const CRV_ED25519: &str = "Ed25519";
pub const CRV_P256: &str = "P-256";

/// Length of one P-256 affine coordinate.
const P256_COORDINATE_LEN: usize = 32;

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

impl Jwks {
    /// Look up a key by `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// Key IDs in document order.
    #[must_use]
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// A single public verification key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key ID.
    pub kid: String,

    /// Key type (`OKP` or `EC`).
    pub kty: String,

    /// Algorithm (`EdDSA` or `ES256`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use (`sig`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Curve (`Ed25519` or `P-256`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Public key (OKP) or x coordinate (EC), base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// y coordinate (EC only), base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Superseded keys carry the instant they leave the verification set
    /// (RFC 3339). Consumers stop accepting the key at that instant even if
    /// their cached copy of the set is older.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl JsonWebKey {
    /// Public JWK for a raw 32-byte Ed25519 public key.
    #[must_use]
    pub fn ed25519(kid: impl Into<String>, public_key: &[u8]) -> Self {
        Self {
            kid: kid.into(),
            kty: KTY_OKP.to_string(),
            alg: Some("EdDSA".to_string()),
            key_use: Some("sig".to_string()),
            crv: Some(CRV_ED25519.to_string()),
            x: Some(encode_b64url(public_key)),
            y: None,
            expires_at: None,
        }
    }

    /// Public JWK for an uncompressed P-256 point (`0x04 || x || y`).
    ///
    /// # Errors
    ///
    /// `UnsupportedKey` if the point is not 65 bytes with the `0x04` prefix.
    pub fn p256(kid: impl Into<String>, uncompressed_point: &[u8]) -> Result<Self, JwtValidationError> {
        let Some((&0x04, coordinates)) = uncompressed_point.split_first() else {
            return Err(JwtValidationError::UnsupportedKey);
        };
        if coordinates.len() != 2 * P256_COORDINATE_LEN {
            return Err(JwtValidationError::UnsupportedKey);
        }
        let (x, y) = coordinates.split_at(P256_COORDINATE_LEN);

        Ok(Self {
            kid: kid.into(),
            kty: KTY_EC.to_string(),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            crv: Some(CRV_P256.to_string()),
            x: Some(encode_b64url(x)),
            y: Some(encode_b64url(y)),
            expires_at: None,
        })
    }

    /// Mark the key with the instant it leaves the verification set.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: Option<String>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Signature algorithm implied by `kty`/`crv`, cross-checked with `alg`.
    ///
    /// # Errors
    ///
    /// `UnsupportedKey` for anything other than Ed25519 or P-256 signing keys.
    pub fn algorithm(&self) -> Result<Algorithm, JwtValidationError> {
        let (algorithm, expected_alg) = match (self.kty.as_str(), self.crv.as_deref()) {
            (KTY_OKP, Some(CRV_ED25519)) => (Algorithm::EdDSA, "EdDSA"),
            (KTY_EC, Some(CRV_P256)) => (Algorithm::ES256, "ES256"),
            _ => return Err(JwtValidationError::UnsupportedKey),
        };

        if self.alg.as_deref().is_some_and(|alg| alg != expected_alg) {
            return Err(JwtValidationError::UnsupportedKey);
        }
        if self.key_use.as_deref().is_some_and(|u| u != "sig") {
            return Err(JwtValidationError::UnsupportedKey);
        }

        Ok(algorithm)
    }

    /// Build a verification key from the public coordinates.
    ///
    /// # Errors
    ///
    /// `UnsupportedKey` if coordinates are missing or not valid base64url.
    pub fn decoding_key(&self) -> Result<DecodingKey, JwtValidationError> {
        let x = self.x.as_deref().ok_or(JwtValidationError::UnsupportedKey)?;
        decode_b64url(x).map_err(|_| JwtValidationError::UnsupportedKey)?;

        let key = match self.algorithm()? {
            Algorithm::EdDSA => DecodingKey::from_ed_components(x),
            _ => {
                let y = self.y.as_deref().ok_or(JwtValidationError::UnsupportedKey)?;
                DecodingKey::from_ec_components(x, y)
            }
        };
        key.map_err(|e| {
            tracing::debug!(target: "common.jwks", kid = %self.kid, error = %e, "Unusable JWK");
            JwtValidationError::UnsupportedKey
        })
    }
}
