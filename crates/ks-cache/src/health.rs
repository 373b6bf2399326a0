//! Readiness reporting for services embedding the cache.

use crate::cache::{HealthStatus, KeyDistributionCache};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

/// 200 while keys are available (even stale or static), 503 with none.
#[tracing::instrument(skip_all, name = "ks_cache.health.readiness")]
pub async fn readiness_handler(
    State(cache): State<Arc<KeyDistributionCache>>,
) -> impl IntoResponse {
    let health = cache.health().await;

    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => {
            tracing::warn!(target: "ks_cache.health", "Readiness check failed: no verification keys");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (status, Json(health))
}

/// `GET /ready` bound to `cache`, for merging into a service router.
pub fn health_routes(cache: Arc<KeyDistributionCache>) -> Router {
    Router::new()
        .route("/ready", get(readiness_handler))
        .with_state(cache)
}
