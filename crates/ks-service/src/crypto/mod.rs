//! Key material: keypair generation, sealing at rest, JWT signing, and
//! conversion of public halves to JWKs.

use crate::errors::KsError;
use crate::models::{KeyRecord, SigningAlgorithm};
use common::jwks::JsonWebKey;
use common::jwt::TokenClaims;
use common::secret::{secret_bytes, ExposeSecret, SecretBytes};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
    signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING},
};
use std::fmt;
use tracing::instrument;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MASTER_KEY_LEN: usize = 32;

/// Encrypted key structure (AES-256-GCM)
///
/// Debug is manually implemented to redact all cryptographic material.
/// Clone is manually implemented because SecretBox requires explicit cloning.
pub struct EncryptedKey {
    /// AES-256-GCM ciphertext of the PKCS#8 document.
    pub encrypted_data: SecretBytes,
    pub nonce: Vec<u8>, // 96-bit (12 bytes)
    pub tag: Vec<u8>,   // 128-bit (16 bytes)
}

impl Clone for EncryptedKey {
    fn clone(&self) -> Self {
        Self {
            encrypted_data: secret_bytes(self.encrypted_data.expose_secret().clone()),
            nonce: self.nonce.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("encrypted_data", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .field("tag", &"[REDACTED]")
            .finish()
    }
}

/// A freshly generated keypair before sealing.
pub struct GeneratedKeyPair {
    pub public_key: Vec<u8>,
    pub private_key_pkcs8: SecretBytes,
}

/// Generate a keypair for `algorithm` from the system CSPRNG.
#[instrument(skip_all, fields(algorithm = %algorithm))]
pub fn generate_keypair(algorithm: SigningAlgorithm) -> Result<GeneratedKeyPair, KsError> {
    let rng = SystemRandom::new();

    match algorithm {
        SigningAlgorithm::EdDsa => {
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
                .map_err(|e| KsError::Generation(format!("Keypair generation failed: {}", e)))?;
            let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                .map_err(|e| KsError::Generation(format!("Keypair parsing failed: {}", e)))?;

            Ok(GeneratedKeyPair {
                public_key: key_pair.public_key().as_ref().to_vec(),
                private_key_pkcs8: secret_bytes(pkcs8.as_ref().to_vec()),
            })
        }
        SigningAlgorithm::Es256 => {
            let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
                .map_err(|e| KsError::Generation(format!("Keypair generation failed: {}", e)))?;
            let key_pair =
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                    .map_err(|e| KsError::Generation(format!("Keypair parsing failed: {}", e)))?;

            Ok(GeneratedKeyPair {
                public_key: key_pair.public_key().as_ref().to_vec(),
                private_key_pkcs8: secret_bytes(pkcs8.as_ref().to_vec()),
            })
        }
    }
}

fn aead_key(master_key: &[u8]) -> Result<LessSafeKey, KsError> {
    if master_key.len() != MASTER_KEY_LEN {
        return Err(KsError::Crypto(format!(
            "Invalid master key length: {} (expected {})",
            master_key.len(),
            MASTER_KEY_LEN
        )));
    }
    let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| KsError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    Ok(LessSafeKey::new(unbound_key))
}

/// Encrypt private key with AES-256-GCM
///
/// Uses a 96-bit random nonce and produces a 128-bit authentication tag
#[instrument(skip_all)]
pub fn encrypt_private_key(
    private_key: &SecretBytes,
    master_key: &SecretBytes,
) -> Result<EncryptedKey, KsError> {
    let sealing_key = aead_key(master_key.expose_secret())?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|e| KsError::Crypto(format!("Nonce generation failed: {}", e)))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = private_key.expose_secret().clone();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| KsError::Crypto(format!("Encryption operation failed: {}", e)))?;

    let tag_start = in_out
        .len()
        .checked_sub(TAG_LEN)
        .ok_or_else(|| KsError::Crypto("Encryption produced invalid output".to_string()))?;
    let tag = in_out
        .get(tag_start..)
        .ok_or_else(|| KsError::Crypto("Encryption produced invalid output".to_string()))?
        .to_vec();
    in_out.truncate(tag_start);

    Ok(EncryptedKey {
        encrypted_data: secret_bytes(in_out),
        nonce: nonce_bytes.to_vec(),
        tag,
    })
}

/// Decrypt private key with AES-256-GCM
#[instrument(skip_all)]
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    master_key: &SecretBytes,
) -> Result<SecretBytes, KsError> {
    let opening_key = aead_key(master_key.expose_secret())?;

    if encrypted.tag.len() != TAG_LEN {
        return Err(KsError::Crypto(format!(
            "Invalid tag length: {} (expected {})",
            encrypted.tag.len(),
            TAG_LEN
        )));
    }

    let nonce_bytes: [u8; NONCE_LEN] = encrypted.nonce.as_slice().try_into().map_err(|_| {
        KsError::Crypto(format!(
            "Invalid nonce length: {} (expected {})",
            encrypted.nonce.len(),
            NONCE_LEN
        ))
    })?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = encrypted.encrypted_data.expose_secret().clone();
    in_out.extend_from_slice(&encrypted.tag);

    let decrypted = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| KsError::Crypto(format!("Decryption operation failed: {}", e)))?;

    Ok(secret_bytes(decrypted.to_vec()))
}

/// Sign `claims` with `record`'s private key; the header carries its `kid`.
#[instrument(skip_all, fields(kid = %record.key_id))]
pub fn sign_jwt(
    claims: &TokenClaims,
    record: &KeyRecord,
    master_key: &SecretBytes,
) -> Result<String, KsError> {
    let pkcs8 = decrypt_private_key(&record.private_key, master_key)?;

    let (algorithm, encoding_key) = match record.algorithm {
        SigningAlgorithm::EdDsa => (
            Algorithm::EdDSA,
            EncodingKey::from_ed_der(pkcs8.expose_secret()),
        ),
        SigningAlgorithm::Es256 => (
            Algorithm::ES256,
            EncodingKey::from_ec_der(pkcs8.expose_secret()),
        ),
    };

    let mut header = Header::new(algorithm);
    header.typ = Some("JWT".to_string());
    header.kid = Some(record.key_id.clone());

    encode(&header, claims, &encoding_key)
        .map_err(|e| KsError::Crypto(format!("JWT signing operation failed: {}", e)))
}

/// Public JWK for `record`, with `expires_at` for superseded keys.
pub fn public_jwk(record: &KeyRecord) -> Result<JsonWebKey, KsError> {
    let jwk = match record.algorithm {
        SigningAlgorithm::EdDsa => JsonWebKey::ed25519(&record.key_id, &record.public_key),
        SigningAlgorithm::Es256 => JsonWebKey::p256(&record.key_id, &record.public_key)
            .map_err(|_| {
                KsError::Crypto(format!("Key {} has a malformed P-256 point", record.key_id))
            })?,
    };

    Ok(jwk.with_expires_at(
        record
            .expires_at
            .filter(|_| !record.is_active)
            .map(|t| t.to_rfc3339()),
    ))
}
