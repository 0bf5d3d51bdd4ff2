//! Error types for the stepflow engine.
//!
//! `AppError` is the crate-wide error. It implements `IntoResponse` so the
//! query/cancel handlers can return it directly, while the message handlers
//! log it and drop the offending message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::bus::BusError;
use crate::engine::state::TransitionError;
use crate::scheduler::ScheduleError;

/// Application-level errors for the engine.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state write lost an optimistic concurrency race.
    #[error("Stale state for execution {execution_id} (expected version {expected})")]
    StaleState { execution_id: i64, expected: i64 },

    /// Illegal status transition
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Job scheduling error
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::StaleState { .. } | AppError::Transition(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Bus(e) => {
                tracing::error!(error = %e, "Bus error");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Schedule(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Config(format!("invalid YAML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = AppError::NotFound("execution 42".to_string());
        assert_eq!(err.to_string(), "Resource not found: execution 42");
    }

    #[test]
    fn test_stale_state_error() {
        let err = AppError::StaleState {
            execution_id: 7,
            expected: 3,
        };
        assert_eq!(
            err.to_string(),
            "Stale state for execution 7 (expected version 3)"
        );
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let response = AppError::StaleState {
            execution_id: 1,
            expected: 1,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
