//! Test server harness for E2E testing
//!
//! Provides `TestKeyServer` for spawning real key service instances in tests.
//! Each server gets its own in-memory store, a `MockClock` starting at
//! [`fixed_epoch`], and a recording audit emitter.

use crate::crypto_fixtures::{fixed_epoch, test_claims, test_master_secret};
use chrono::{DateTime, Utc};
use ks_service::clock::{Clock, MockClock};
use ks_service::config::{RotationSettings, DEFAULT_JWKS_MAX_AGE_SECONDS, DEFAULT_STORE_TIMEOUT_SECONDS};
use ks_service::crypto;
use ks_service::models::SigningAlgorithm;
use ks_service::observability::metrics::detached_metrics_handle;
use ks_service::repositories::{InMemoryKeyStore, KeyStore};
use ks_service::routes::{self, AppState};
use ks_service::services::audit::mock::RecordingAuditEmitter;
use ks_service::services::key_generator::{KeyGenerator, RingKeyGenerator};
use ks_service::services::rotation_manager::{RotationManager, RotationOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cluster prefix for key IDs minted by the harness.
pub const TEST_CLUSTER: &str = "test-cluster";

/// Knobs for [`TestKeyServer::spawn_with`].
pub struct TestServerOptions {
    pub settings: RotationSettings,
    pub algorithm: SigningAlgorithm,
    pub start: DateTime<Utc>,
    pub store_timeout: Duration,
    pub jwks_max_age: Duration,
    /// Replaces the default in-memory store (e.g. a `FaultInjectingStore`).
    pub store: Option<Arc<dyn KeyStore>>,
    /// Replaces the default ring generator (e.g. a `FailingKeyGenerator`).
    pub generator: Option<Arc<dyn KeyGenerator>>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            settings: RotationSettings::default(),
            algorithm: SigningAlgorithm::EdDsa,
            start: fixed_epoch(),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECONDS),
            jwks_max_age: Duration::from_secs(DEFAULT_JWKS_MAX_AGE_SECONDS),
            store: None,
            generator: None,
        }
    }
}

impl TestServerOptions {
    pub fn with_overlap(mut self, overlap: chrono::Duration) -> Self {
        self.settings.overlap = overlap;
        self
    }

    pub fn with_interval(mut self, interval: chrono::Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// Test harness for spawning the key service in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_jwks_e2e() -> Result<()> {
///     let server = TestKeyServer::spawn().await?;
///     let jwks: Jwks = reqwest::get(server.jwks_url()).await?.json().await?;
///     assert_eq!(jwks.len(), 1);
///     Ok(())
/// }
/// ```
pub struct TestKeyServer {
    addr: SocketAddr,
    manager: Arc<RotationManager>,
    clock: MockClock,
    store: Arc<dyn KeyStore>,
    audit: Arc<RecordingAuditEmitter>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TestKeyServer {
    /// Spawn a server with default rotation settings (7 day interval, 24 hour overlap).
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawn a server and bootstrap its first signing key
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Initialize the first signing key at `options.start`
    /// - Serve until dropped or [`TestKeyServer::shutdown`] is called
    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let clock = MockClock::new(options.start);
        let audit = Arc::new(RecordingAuditEmitter::new());
        let store: Arc<dyn KeyStore> = match options.store {
            Some(store) => store,
            None => Arc::new(InMemoryKeyStore::new()),
        };
        let generator: Arc<dyn KeyGenerator> = match options.generator {
            Some(generator) => generator,
            None => Arc::new(RingKeyGenerator::new(TEST_CLUSTER, &test_master_secret())),
        };

        let manager = Arc::new(RotationManager::new(
            Arc::clone(&store),
            generator,
            audit.clone(),
            Arc::new(clock.clone()),
            RotationOptions {
                algorithm: options.algorithm,
                settings: options.settings,
                store_timeout: options.store_timeout,
            },
        ));

        manager
            .initialize()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize signing key: {}", e))?;

        let state = Arc::new(AppState {
            manager: Arc::clone(&manager),
            jwks_max_age: options.jwks_max_age,
        });

        // Each server gets its own recorder; the global one may already be
        // taken by another test in the same process.
        let app = routes::build_routes(state, detached_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            manager,
            clock,
            store,
            audit,
            cancel,
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.url())
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn manager(&self) -> &Arc<RotationManager> {
        &self.manager
    }

    pub fn clock(&self) -> &MockClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    pub fn audit(&self) -> &RecordingAuditEmitter {
        &self.audit
    }

    /// Sign a day-long token for `subject` with the current signing key,
    /// issued at the harness clock's `now`.
    pub async fn sign_token(&self, subject: &str) -> Result<String, anyhow::Error> {
        let record = self
            .manager
            .resolver()
            .signing_key()
            .await
            .map_err(|e| anyhow::anyhow!("No signing key: {}", e))?;

        crypto::sign_jwt(
            &test_claims(subject, self.clock.now()),
            &record,
            &test_master_secret(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign token: {}", e))
    }

    /// Stop serving and wait for the listener to close.
    ///
    /// The manager and store stay usable after shutdown.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestKeyServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
