use crate::errors::KsError;
use crate::observability::metrics::{record_jwks_request, set_verification_keys};
use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use common::jwks::Jwks;
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns the verification key set (active key plus superseded keys still
/// inside their overlap window) as RFC 7517 JWKS. Public material only.
#[instrument(name = "ks.jwks.get", skip_all, fields(status, key_count))]
pub async fn handle_get_jwks(
    State(state): State<Arc<AppState>>,
) -> Result<(HeaderMap, Json<Jwks>), KsError> {
    let now = state.manager.now();
    let result = state.manager.resolver().jwks(now).await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_jwks_request();

    let jwks = result?;
    tracing::Span::current().record("key_count", jwks.len());
    set_verification_keys(jwks.len());

    let mut headers = HeaderMap::new();
    let cache_control = format!("max-age={}", state.jwks_max_age.as_secs());
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_str(&cache_control).unwrap_or(HeaderValue::from_static("max-age=3600")),
    );

    Ok((headers, Json(jwks)))
}
