//! Tracker error types with HTTP status code mapping.
//!
//! [`TrackerError`] is the central error type for the service. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! Errors raised on the pixel-serving path never reach the client; they are
//! logged and the static pixel is served anyway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "ok": false,
///   "error": {
///     "code": 1002,
///     "message": "missing identifier: email_id is required"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false` for error responses.
    pub ok: bool,
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | Access/State    | 401 Unauthorized / 409       |
/// | 3000–3999 | Server          | 500 / 503                    |
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Pixel token could not be reversed, parsed, or lacks a required field.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A signal request arrived without an `email_id`.
    #[error("missing identifier: {0}")]
    MissingIdentifier(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Dashboard token missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// The requested sender-signal channel is not the active one.
    #[error("signal channel disabled: {0}")]
    SignalChannelDisabled(&'static str),

    /// Store unavailable or a write failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// IP to location lookup failed.
    #[error("geo lookup failure: {0}")]
    GeoLookupFailure(String),

    /// An operation exceeded its time bound.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidToken(_) => 1001,
            Self::MissingIdentifier(_) => 1002,
            Self::InvalidRequest(_) => 1003,
            Self::Unauthorized => 2001,
            Self::SignalChannelDisabled(_) => 2002,
            Self::Internal(_) => 3000,
            Self::PersistenceFailure(_) => 3001,
            Self::GeoLookupFailure(_) => 3002,
            Self::Timeout(_) => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken(_) | Self::MissingIdentifier(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SignalChannelDisabled(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PersistenceFailure(_) | Self::GeoLookupFailure(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for TrackerError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TrackerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::PersistenceFailure(format!("migration failed: {err}"))
    }
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            ok: false,
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
