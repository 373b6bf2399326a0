use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KsError {
    /// Key material could not be produced. Fatal to the rotation attempt only.
    #[error("Key generation failed: {0}")]
    Generation(String),

    /// Key store read or write failed (or timed out).
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The store holds no active signing key.
    #[error("No active signing key")]
    NoActiveKey,

    /// Another rotation holds the rotation lock.
    #[error("Rotation already in progress")]
    RotationInProgress,

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Internal server error")]
    Internal,
}

impl KsError {
    /// Stable code used in error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            KsError::Generation(_) => "GENERATION_ERROR",
            KsError::Persistence(_) => "PERSISTENCE_ERROR",
            KsError::NoActiveKey => "NO_ACTIVE_KEY",
            KsError::RotationInProgress => "ROTATION_IN_PROGRESS",
            KsError::Crypto(_) => "CRYPTO_ERROR",
            KsError::InvalidToken(_) => "INVALID_TOKEN",
            KsError::Internal => "INTERNAL_ERROR",
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

impl IntoResponse for KsError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            KsError::Generation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Key rotation failed; the current signing key remains active",
            ),
            KsError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal storage error occurred",
            ),
            KsError::NoActiveKey => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No signing key is available",
            ),
            KsError::RotationInProgress => (
                StatusCode::CONFLICT,
                "A key rotation is already in progress",
            ),
            KsError::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal cryptographic error occurred",
            ),
            KsError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                "The access token is invalid or expired",
            ),
            KsError::Internal => (
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
