use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Generic message for every token rejection.
pub(crate) const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

#[derive(Debug, Error)]
pub enum CacheError {
    /// The distribution endpoint could not be reached or returned garbage.
    #[error("Key distribution unavailable: {0}")]
    DistributionUnavailable(String),

    /// Nothing was ever fetched and no static fallback is configured.
    #[error("No verification keys available")]
    NoKeysAvailable,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::DistributionUnavailable(_) => "DISTRIBUTION_UNAVAILABLE",
            CacheError::NoKeysAvailable => "NO_KEYS_AVAILABLE",
            CacheError::InvalidToken(_) => "INVALID_TOKEN",
            CacheError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::DistributionUnavailable(_) | CacheError::NoKeysAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Authentication service unavailable",
            ),
            CacheError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, INVALID_TOKEN_MESSAGE),
            CacheError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred",
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: message.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
