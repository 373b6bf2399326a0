use crate::crypto;
use crate::errors::KsError;
use crate::models::{KeyRecord, SigningAlgorithm};
use chrono::{DateTime, Utc};
use common::secret::{clone_secret_bytes, SecretBytes};
use tracing::instrument;
use uuid::Uuid;

/// Produces new, inactive key records.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, algorithm: SigningAlgorithm, now: DateTime<Utc>) -> Result<KeyRecord, KsError>;
}

/// `ring`-backed generator that seals private keys under the master key.
pub struct RingKeyGenerator {
    cluster_name: String,
    master_key: SecretBytes,
}

impl RingKeyGenerator {
    pub fn new(cluster_name: impl Into<String>, master_key: &SecretBytes) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            master_key: clone_secret_bytes(master_key),
        }
    }
}

/// `{cluster}-{YYYYMMDD}-{uuid}`; the UUID makes IDs unique across restarts
/// and replicas.
pub fn new_key_id(cluster_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        cluster_name,
        now.format("%Y%m%d"),
        Uuid::new_v4().simple()
    )
}

impl KeyGenerator for RingKeyGenerator {
    #[instrument(skip_all, fields(algorithm = %algorithm))]
    fn generate(&self, algorithm: SigningAlgorithm, now: DateTime<Utc>) -> Result<KeyRecord, KsError> {
        let pair = crypto::generate_keypair(algorithm)?;
        let private_key = crypto::encrypt_private_key(&pair.private_key_pkcs8, &self.master_key)
            .map_err(|e| KsError::Generation(format!("Sealing private key failed: {}", e)))?;

        let key_id = new_key_id(&self.cluster_name, now);
        tracing::debug!(target: "ks.rotation", key_id = %key_id, "Generated signing key");

        Ok(KeyRecord {
            key_id,
            algorithm,
            public_key: pair.public_key,
            private_key,
            is_active: false,
            created_at: now,
            expires_at: None,
            rotation_reason: None,
            rotated_at: None,
        })
    }
}

/// Test doubles for key generation.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails a configurable number of calls, then delegates.
    pub struct FailingKeyGenerator<G> {
        inner: G,
        remaining_failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl<G: KeyGenerator> FailingKeyGenerator<G> {
        pub fn new(inner: G, failures: usize) -> Self {
            Self {
                inner,
                remaining_failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }

        /// Fail every call until `set_failures` is called.
        pub fn always(inner: G) -> Self {
            Self::new(inner, usize::MAX)
        }

        pub fn set_failures(&self, failures: usize) {
            self.remaining_failures.store(failures, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl<G: KeyGenerator> KeyGenerator for FailingKeyGenerator<G> {
        fn generate(&self, algorithm: SigningAlgorithm, now: DateTime<Utc>) -> Result<KeyRecord, KsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(KsError::Generation("injected entropy failure".to_string()));
            }
            self.inner.generate(algorithm, now)
        }
    }
}
