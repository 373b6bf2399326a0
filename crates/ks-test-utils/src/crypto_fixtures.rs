//! Deterministic cryptographic fixtures for testing
//!
//! The same seed always produces the same Ed25519 keypair, so JWKS documents
//! and tokens built from these fixtures are reproducible across runs.

use chrono::{DateTime, TimeZone, Utc};
use common::jwks::{JsonWebKey, Jwks};
use common::jwt::TokenClaims;
use common::secret::{secret_bytes, SecretBytes};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::time::Duration;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Fixed instant the harness clock starts at.
pub fn fixed_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Test master key for sealing private keys.
///
/// Returns a deterministic 32-byte key for AES-256-GCM.
pub fn test_master_key() -> Vec<u8> {
    (0u8..32).collect()
}

pub fn test_master_secret() -> SecretBytes {
    secret_bytes(test_master_key())
}

/// A seeded Ed25519 key that can sign tokens and describe itself as a JWK.
///
/// Used where a JWKS has to be served without a running key service, e.g.
/// behind a wiremock server.
#[derive(Debug, Clone)]
pub struct TestSigningKey {
    pub kid: String,
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl TestSigningKey {
    /// Build the key for `seed`; `kid` is `test-key-{seed}`.
    pub fn from_seed(seed: u8) -> Result<Self, FixtureError> {
        let mut seed_bytes = [0u8; 32];
        for (i, byte) in seed_bytes.iter_mut().enumerate() {
            *byte = seed.wrapping_mul(31).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

        Ok(Self {
            kid: format!("test-key-{}", seed),
            pkcs8: build_pkcs8_from_seed(&seed_bytes),
            public_key: key_pair.public_key().as_ref().to_vec(),
        })
    }

    pub fn jwk(&self) -> JsonWebKey {
        JsonWebKey::ed25519(&self.kid, &self.public_key)
    }

    /// Sign `claims` with this key; the header carries `kid`.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());

        encode(&header, claims, &EncodingKey::from_ed_der(&self.pkcs8))
            .map_err(|e| FixtureError::Crypto(format!("Failed to sign test token: {}", e)))
    }
}

/// JWKS containing the public half of each key.
pub fn test_jwks(keys: &[&TestSigningKey]) -> Jwks {
    Jwks {
        keys: keys.iter().map(|k| k.jwk()).collect(),
    }
}

/// Day-long token for `subject` issued at `iat`.
pub fn test_claims(subject: &str, iat: DateTime<Utc>) -> TokenClaims {
    TokenClaims::new(subject, iat.timestamp(), Duration::from_secs(86_400), "keys.read")
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
///
/// ring does not export PKCS#8 for seeded keys, so the DER is assembled by hand.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];
    pkcs8.extend_from_slice(seed);
    pkcs8
}
