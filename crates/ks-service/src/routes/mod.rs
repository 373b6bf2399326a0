//! HTTP routes for the key service.

use crate::handlers::{health_handler, jwks_handler, metrics_handler, rotation_handler};
use crate::services::rotation_manager::RotationManager;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RotationManager>,

    /// `Cache-Control: max-age` for the JWKS document.
    pub jwks_max_age: Duration,
}

/// Build the application routes.
///
/// - `/.well-known/jwks.json` - verification key set
/// - `/internal/rotate-keys` - manual rotation (privileged, auth upstream)
/// - `/internal/rotation-status` - rotation manager status
/// - `/health`, `/ready` - liveness and readiness
/// - `/metrics` - Prometheus
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let app_routes = Router::new()
        .route("/.well-known/jwks.json", get(jwks_handler::handle_get_jwks))
        .route("/internal/rotate-keys", post(rotation_handler::handle_rotate_keys))
        .route(
            "/internal/rotation-status",
            get(rotation_handler::handle_rotation_status),
        )
        .route("/health", get(health_handler::health_check))
        .route("/ready", get(health_handler::readiness_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler::metrics_handler))
        .with_state(metrics_handle);

    app_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
