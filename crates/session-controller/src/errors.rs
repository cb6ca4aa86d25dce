//! Session Controller error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse`
//! impl, and to numeric error codes for replies on the real-time channel.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session Controller error type.
///
/// Maps to appropriate HTTP status codes:
/// - Validation: 400 Bad Request
/// - Unauthorized: 401 Unauthorized
/// - Forbidden, OutsideTimeWindow: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - RateLimited: 429 Too Many Requests (carries `retry_after`)
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ScError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invitation token evaluated outside its meeting's validity window.
    #[error("Invitation outside its validity window")]
    OutsideTimeWindow,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cooldown or fetch quota exceeded. Always carries retry guidance.
    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ScError::Validation(_) => 400,
            ScError::Unauthorized(_) => 401,
            ScError::Forbidden(_) | ScError::OutsideTimeWindow => 403,
            ScError::NotFound(_) => 404,
            ScError::Conflict(_) => 409,
            ScError::RateLimited { .. } => 429,
            ScError::Internal(_) => 500,
        }
    }

    /// Returns the numeric error code used in real-time channel replies.
    pub fn error_code(&self) -> i32 {
        match self {
            ScError::Validation(_) => 1,
            ScError::Unauthorized(_) => 2,
            ScError::Forbidden(_) | ScError::OutsideTimeWindow => 3,
            ScError::NotFound(_) => 4,
            ScError::Conflict(_) => 5,
            ScError::RateLimited { .. } => 6,
            ScError::Internal(_) => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            ScError::Internal(_) => "An internal error occurred".to_string(),
            ScError::OutsideTimeWindow => "Invitation outside its validity window".to_string(),
            ScError::RateLimited {
                retry_after_seconds,
            } => format!("Too many requests, retry after {retry_after_seconds}s"),
            ScError::Validation(msg)
            | ScError::Unauthorized(msg)
            | ScError::Forbidden(msg)
            | ScError::NotFound(msg)
            | ScError::Conflict(msg) => msg.clone(),
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
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ScError {
    fn into_response(self) -> Response {
        let (status, code, retry_after) = match &self {
            ScError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
            ScError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            ScError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", None),
            ScError::OutsideTimeWindow => (StatusCode::FORBIDDEN, "OUTSIDE_TIME_WINDOW", None),
            ScError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ScError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", None),
            ScError::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                Some(*retry_after_seconds),
            ),
            ScError::Internal(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "sc.errors", error = %err, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.client_message(),
                retry_after,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"chorus-signaling\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        // Advisory Retry-After header for 429 responses
        if let Some(seconds) = retry_after {
            if let Ok(header_value) = seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}
