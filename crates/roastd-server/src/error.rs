//! HTTP error types for the `roastd` server.
//!
//! Maps domain errors onto HTTP responses. Every variant produces a JSON
//! body with a machine-readable `error` field and a human-readable
//! `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use roastd_core::QueueError;
use roastd_fabric::commands::CommandError;
use roastd_fabric::dispatcher::ReplayError;
use roastd_fabric::governor::GovernorError;
use roastd_store::StoreError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    BadRequest(String),
    /// Requested resource not found.
    NotFound(String),
    /// A state conflict (wrong proposal status, stale lease).
    Conflict(String),
    /// The requested feature is disabled by configuration.
    Forbidden(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Config { .. } => Self::BadRequest(err.to_string()),
            StoreError::Database(_) | StoreError::Corrupt { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound { .. } => Self::NotFound(err.to_string()),
            QueueError::InvalidRequest { .. } => Self::BadRequest(err.to_string()),
            QueueError::Backend { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<CommandError> for AppError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound { .. } => Self::NotFound(err.to_string()),
            CommandError::InvalidState { .. } => Self::Conflict(err.to_string()),
            CommandError::NoDriver { .. } => Self::BadRequest(err.to_string()),
            CommandError::Driver(_) => Self::Internal(err.to_string()),
            CommandError::Store(inner) => inner.into(),
        }
    }
}

impl From<GovernorError> for AppError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::ProposalNotFound { .. } => Self::NotFound(err.to_string()),
            GovernorError::Store(inner) => inner.into(),
        }
    }
}

impl From<ReplayError> for AppError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Disabled => Self::Forbidden(err.to_string()),
            ReplayError::Invalid { .. } => Self::BadRequest(err.to_string()),
            ReplayError::Submit(inner) => inner.into(),
        }
    }
}
