//! Health check handlers.
//!
//! - `/health`: Liveness check - returns OK if the process is running
//! - `/ready`: Readiness check - requires a signing key

use crate::models::RotationStatus;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness handler.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness handler.
///
/// 200 with the rotation status when a signing key exists, 503 otherwise.
/// Error messages are generic; details go to the server log.
#[tracing::instrument(skip_all, name = "ks.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = match state.manager.status().await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(target: "ks.health", error = %e, "Readiness check failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    rotation: None,
                    error: Some("Key store unavailable".to_string()),
                }),
            );
        }
    };

    if status.current_key_id.is_none() {
        tracing::warn!(target: "ks.health", "Readiness check failed: no active signing key");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                rotation: Some(status),
                error: Some("No signing key is available".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            rotation: Some(status),
            error: None,
        }),
    )
}
