//! JSON error responses for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::FinderError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// A [`FinderError`] on its way to becoming a response.
#[derive(Debug)]
pub struct ApiError(pub FinderError);

impl From<FinderError> for ApiError {
    fn from(err: FinderError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        let err = &self.0;
        match err {
            FinderError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            FinderError::InvalidArgument(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
            FinderError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message.clone()),
            FinderError::AlreadyRunning(_) => {
                (StatusCode::CONFLICT, "ALREADY_RUNNING", err.to_string())
            }
            _ if err.is_upstream() => {
                tracing::warn!(error = %err, "Upstream failure");
                (StatusCode::BAD_GATEWAY, "UPSTREAM", err.to_string())
            }
            _ => {
                tracing::error!(error = %err, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}
