//! API error types and responses.
//!
//! This module defines the standard error format for all API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use call_ribbon_engine::EngineError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid API key.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not access this resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The tenant's monthly call quota is used up.
    #[error("monthly call quota exceeded: {used} of {limit} calls used")]
    QuotaExceeded {
        /// Monthly limit.
        limit: u64,
        /// Calls counted this month.
        used: u64,
    },

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A dependency did not answer in time; the request may be retried.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::BadRequest(_) => "bad_request",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidTenant(reason) => Self::Unauthorized(reason),
            EngineError::OriginNotAllowed { origin } => {
                Self::Forbidden(format!("origin {origin:?} is not allowed"))
            }
            EngineError::QuotaExceeded { limit, used, .. } => Self::QuotaExceeded { limit, used },
            EngineError::UnknownSession(id) => Self::NotFound(format!("session {id}")),
            EngineError::UnknownCustomer(id) => Self::NotFound(format!("customer {id}")),
            err @ EngineError::IllegalTransition { .. } => Self::Conflict(err.to_string()),
            err @ EngineError::Conflict(_) => Self::Conflict(err.to_string()),
            err @ EngineError::InvalidRange { .. } => Self::BadRequest(err.to_string()),
            EngineError::InvalidRequest(msg) => Self::BadRequest(msg),
            EngineError::Timeout { operation } => {
                tracing::warn!(operation, "Engine operation timed out");
                Self::Unavailable(format!("{operation} timed out"))
            }
            EngineError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store error");
                Self::Internal("storage error".to_string())
            }
            EngineError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
        }
    }
}
