use crate::errors::KsError;
use crate::models::{Actor, RotateKeysResponse, RotationStatus};
use crate::routes::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the caller identity, set by the authenticating proxy.
pub const ACTOR_HEADER: &str = "x-actor-id";

const DEFAULT_ACTOR: &str = "admin";

/// Handle manual rotation
///
/// POST /internal/rotate-keys
///
/// Authorization is enforced upstream. The rotation runs on its own task so
/// a disconnecting client cannot cut it short.
#[instrument(name = "ks.rotation.manual", skip_all)]
pub async fn handle_rotate_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RotateKeysResponse>, KsError> {
    let identity = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string();

    let manager = Arc::clone(&state.manager);
    let outcome = tokio::spawn(async move { manager.rotate_now(Actor::Admin(identity)).await })
        .await
        .map_err(|e| {
            tracing::error!(target: "ks.rotation", error = %e, "Rotation task failed");
            KsError::Internal
        })??;

    Ok(Json(RotateKeysResponse {
        rotated: true,
        new_key_id: outcome.new_key_id,
        old_key_id: outcome.previous_key_id,
    }))
}

/// GET /internal/rotation-status
#[instrument(name = "ks.rotation.status", skip_all)]
pub async fn handle_rotation_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RotationStatus>, KsError> {
    Ok(Json(state.manager.status().await?))
}
