//! HTTP error mapping.  Every failure leaves the service as
//! `{ "error": "<message>" }` with a status chosen by kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::history::PersistenceError;
use crate::provider::{ProviderError, PROVIDER_FAILURE_MESSAGE};
use crate::validation::ValidationError;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    AuthUnavailable(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Request too large (body exceeded limit {limit} bytes)")]
    BodyTooLarge { limit: usize },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AuthUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Validation(err) if err.is_size_violation() => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Provider(_) | ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show the caller.  Infrastructure errors get a fixed
    /// message; their details only go to the log.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::AuthUnavailable(_) => "Authentication service unavailable".to_string(),
            ApiError::Provider(_) => PROVIDER_FAILURE_MESSAGE.to_string(),
            ApiError::Persistence(_) => "Failed to fetch history".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}
