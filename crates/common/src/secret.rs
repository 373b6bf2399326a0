//! Secret types for protecting key material from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across the workspace. `SecretBox<T>`
//! and `SecretString` implement `Debug` with redaction, so a struct that
//! derives `Debug` while holding one of them stays safe to log. Values are
//! zeroized on drop.
//!
//! # Usage Guidelines
//!
//! - The master key that seals private signing material: [`SecretBytes`]
//! - Sealed or plaintext private key bytes: [`SecretBytes`]
//! - Bearer tokens passed between services: `SecretString`
//!
//! ```rust
//! use common::secret::{secret_bytes, ExposeSecret};
//!
//! let master_key = secret_bytes(vec![7u8; 32]);
//! assert!(format!("{master_key:?}").contains("REDACTED"));
//! assert_eq!(master_key.expose_secret().len(), 32);
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Owned secret byte buffer (master keys, private key material).
pub type SecretBytes = SecretBox<Vec<u8>>;

/// Wrap raw bytes in a [`SecretBytes`].
#[must_use]
pub fn secret_bytes(bytes: Vec<u8>) -> SecretBytes {
    SecretBox::new(Box::new(bytes))
}

/// Clone a [`SecretBytes`] explicitly.
///
/// `SecretBox<Vec<u8>>` does not implement `Clone`; copying key material
/// should be a visible decision at the call site.
#[must_use]
pub fn clone_secret_bytes(secret: &SecretBytes) -> SecretBytes {
    secret_bytes(secret.expose_secret().clone())
}
