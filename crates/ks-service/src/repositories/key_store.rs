//! Key store seam and the in-memory implementation.

use crate::errors::KsError;
use crate::models::{KeyRecord, RotationConfig};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Persistence for key records and the rotation policy.
///
/// Implementations must never expose two active records, and must never
/// accept a `key_id` that already exists.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a new record. Rejects duplicate IDs and a second active key.
    async fn save(&self, record: &KeyRecord) -> Result<(), KsError>;

    /// The current signing key, `None` before bootstrap.
    async fn load_active(&self) -> Result<Option<KeyRecord>, KsError>;

    /// Every record ever generated, oldest first.
    async fn load_all(&self) -> Result<Vec<KeyRecord>, KsError>;

    /// Atomically insert `new_active` and replace the current active record
    /// with `superseded`. Fails without side effects if `superseded.key_id`
    /// is not the active key.
    async fn rotate(&self, new_active: &KeyRecord, superseded: &KeyRecord) -> Result<(), KsError>;

    async fn save_rotation_config(&self, config: &RotationConfig) -> Result<(), KsError>;

    async fn load_rotation_config(&self) -> Result<Option<RotationConfig>, KsError>;
}

#[derive(Default)]
struct Inner {
    keys: Vec<KeyRecord>,
    config: Option<RotationConfig>,
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct InMemoryKeyStore {
    inner: RwLock<Inner>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn save(&self, record: &KeyRecord) -> Result<(), KsError> {
        let mut inner = self.inner.write().await;

        if inner.keys.iter().any(|k| k.key_id == record.key_id) {
            return Err(KsError::Persistence(format!(
                "Key ID {} already exists",
                record.key_id
            )));
        }
        if record.is_active && inner.keys.iter().any(|k| k.is_active) {
            return Err(KsError::Persistence(
                "An active signing key already exists".to_string(),
            ));
        }

        inner.keys.push(record.clone());
        Ok(())
    }

    async fn load_active(&self) -> Result<Option<KeyRecord>, KsError> {
        let inner = self.inner.read().await;
        Ok(inner.keys.iter().find(|k| k.is_active).cloned())
    }

    async fn load_all(&self) -> Result<Vec<KeyRecord>, KsError> {
        Ok(self.inner.read().await.keys.clone())
    }

    async fn rotate(&self, new_active: &KeyRecord, superseded: &KeyRecord) -> Result<(), KsError> {
        let mut inner = self.inner.write().await;

        if inner.keys.iter().any(|k| k.key_id == new_active.key_id) {
            return Err(KsError::Persistence(format!(
                "Key ID {} already exists",
                new_active.key_id
            )));
        }

        let Some(current) = inner
            .keys
            .iter_mut()
            .find(|k| k.is_active && k.key_id == superseded.key_id)
        else {
            return Err(KsError::Persistence(format!(
                "Key {} is no longer the active key",
                superseded.key_id
            )));
        };

        *current = superseded.clone();
        current.is_active = false;

        let mut activated = new_active.clone();
        activated.is_active = true;
        inner.keys.push(activated);

        Ok(())
    }

    async fn save_rotation_config(&self, config: &RotationConfig) -> Result<(), KsError> {
        self.inner.write().await.config = Some(config.clone());
        Ok(())
    }

    async fn load_rotation_config(&self) -> Result<Option<RotationConfig>, KsError> {
        Ok(self.inner.read().await.config.clone())
    }
}

/// Test doubles for the key store.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Wraps a store and fails or delays selected operations on demand.
    pub struct FaultInjectingStore {
        inner: Arc<dyn KeyStore>,
        fail_save: AtomicBool,
        fail_rotate: AtomicBool,
        fail_save_config: AtomicBool,
        fail_loads: AtomicBool,
        rotate_delay_ms: AtomicU64,
    }

    impl FaultInjectingStore {
        pub fn new(inner: Arc<dyn KeyStore>) -> Self {
            Self {
                inner,
                fail_save: AtomicBool::new(false),
                fail_rotate: AtomicBool::new(false),
                fail_save_config: AtomicBool::new(false),
                fail_loads: AtomicBool::new(false),
                rotate_delay_ms: AtomicU64::new(0),
            }
        }

        pub fn fail_save(&self, fail: bool) {
            self.fail_save.store(fail, Ordering::SeqCst);
        }

        pub fn fail_rotate(&self, fail: bool) {
            self.fail_rotate.store(fail, Ordering::SeqCst);
        }

        pub fn fail_save_config(&self, fail: bool) {
            self.fail_save_config.store(fail, Ordering::SeqCst);
        }

        pub fn fail_loads(&self, fail: bool) {
            self.fail_loads.store(fail, Ordering::SeqCst);
        }

        /// Sleep before every `rotate` call.
        pub fn delay_rotate(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.rotate_delay_ms.store(millis, Ordering::SeqCst);
        }

        fn check(flag: &AtomicBool, op: &str) -> Result<(), KsError> {
            if flag.load(Ordering::SeqCst) {
                return Err(KsError::Persistence(format!("injected {} failure", op)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyStore for FaultInjectingStore {
        async fn save(&self, record: &KeyRecord) -> Result<(), KsError> {
            Self::check(&self.fail_save, "save")?;
            self.inner.save(record).await
        }

        async fn load_active(&self) -> Result<Option<KeyRecord>, KsError> {
            Self::check(&self.fail_loads, "load_active")?;
            self.inner.load_active().await
        }

        async fn load_all(&self) -> Result<Vec<KeyRecord>, KsError> {
            Self::check(&self.fail_loads, "load_all")?;
            self.inner.load_all().await
        }

        async fn rotate(
            &self,
            new_active: &KeyRecord,
            superseded: &KeyRecord,
        ) -> Result<(), KsError> {
            let delay = self.rotate_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Self::check(&self.fail_rotate, "rotate")?;
            self.inner.rotate(new_active, superseded).await
        }

        async fn save_rotation_config(&self, config: &RotationConfig) -> Result<(), KsError> {
            Self::check(&self.fail_save_config, "save_rotation_config")?;
            self.inner.save_rotation_config(config).await
        }

        async fn load_rotation_config(&self) -> Result<Option<RotationConfig>, KsError> {
            Self::check(&self.fail_loads, "load_rotation_config")?;
            self.inner.load_rotation_config().await
        }
    }
}
