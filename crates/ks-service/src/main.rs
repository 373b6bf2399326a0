//! Key Service
//!
//! Entry point for the signing-key authority.

use ks_service::clock::SystemClock;
use ks_service::config::Config;
use ks_service::observability::metrics::init_metrics_recorder;
use ks_service::repositories::{InMemoryKeyStore, KeyStore, PgKeyStore};
use ks_service::routes::{self, AppState};
use ks_service::services::audit::{AuditEmitter, PgAuditEmitter, TracingAuditEmitter};
use ks_service::services::key_generator::RingKeyGenerator;
use ks_service::services::rotation_manager::{RotationManager, RotationOptions};
use ks_service::tasks::spawn_rotation_scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ks_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Key Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cluster = %config.cluster_name,
        bind_address = %config.bind_address,
        algorithm = %config.signing_algorithm,
        rotation_enabled = config.rotation.enabled,
        trigger = %config.rotation.trigger_type,
        interval_hours = config.rotation.interval.num_hours(),
        overlap_hours = config.rotation.overlap.num_hours(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let (store, audit): (Arc<dyn KeyStore>, Arc<dyn AuditEmitter>) = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(config.store_timeout)
                .connect(database_url)
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;
            info!("Database connection established");
            let store: Arc<dyn KeyStore> = Arc::new(PgKeyStore::new(db_pool.clone()));
            let audit: Arc<dyn AuditEmitter> = Arc::new(PgAuditEmitter::new(db_pool));
            (store, audit)
        }
        None => {
            warn!("DATABASE_URL not set; keys are held in memory and lost on restart");
            let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
            let audit: Arc<dyn AuditEmitter> = Arc::new(TracingAuditEmitter);
            (store, audit)
        }
    };

    let manager = Arc::new(RotationManager::new(
        store,
        Arc::new(RingKeyGenerator::new(&config.cluster_name, &config.master_key)),
        audit,
        Arc::new(SystemClock),
        RotationOptions::from_config(&config),
    ));

    // No signing key means no safe way to serve; refuse to start.
    info!("Initializing signing keys...");
    let active = manager.initialize().await.map_err(|e| {
        error!("Failed to initialize signing key: {}", e);
        e
    })?;
    info!(key_id = %active.key_id, "Signing keys initialized");

    let cancel_token = CancellationToken::new();
    let scheduler = spawn_rotation_scheduler(
        Arc::clone(&manager),
        config.scheduler_tick,
        cancel_token.clone(),
    );

    let state = Arc::new(AppState {
        manager,
        jwks_max_age: config.jwks_max_age,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Key Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone(), config.drain_period))
        .await?;

    // Covers serve() returning for reasons other than a signal.
    cancel_token.cancel();
    if let Err(e) = scheduler.await {
        error!("Rotation scheduler task failed: {}", e);
    }

    info!("Key Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// Stops the rotation scheduler first, then waits out the drain period.
async fn shutdown_signal(cancel_token: CancellationToken, drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    cancel_token.cancel();

    if drain_period.is_zero() {
        info!("Skipping drain period (KS_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain_period.as_secs());
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
