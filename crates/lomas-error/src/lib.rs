//! Unified error types for every lomas crate.
//!
//! Each crate boundary (store, broker, config, core admission) owns a
//! narrow error enum; this crate wraps them all in one `RuntimeError` so
//! the HTTP surface has a single `IntoResponse` impl to maintain.

mod broker;
mod config;
mod core;
mod store;

pub use broker::BrokerError;
pub use config::ConfigError;
pub use core::{CoreError, InvalidQueryReason, UnauthorizedReason};
pub use store::StoreError;

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;

/// Top-level error wrapping every domain error in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// An error from the core admission protocol.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from the Administration or Metadata & Credentials Store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An error from the Task Broker.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// An error loading or validating configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Broker(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
        }
    }
}

/// Error response body, consistent across every `/` endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Broad error category (e.g. `"core_error"`).
    pub error: String,
    /// Human-readable description of the error.
    pub error_description: String,
    /// Stable machine-readable error code.
    pub error_code: String,
    /// Seconds the client should wait before retrying, if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    /// Build a new error response body.
    #[must_use]
    pub fn new(error: impl Into<String>, description: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: description.into(),
            error_code: code.into(),
            retry_after: None,
        }
    }

    /// Attach a `retry_after` hint, in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl IntoResponse for RuntimeError {
    fn into_response(self) -> Response {
        let error_code = self.error_code();

        let (status, response) = match &self {
            Self::Core(e) => {
                let status = match e {
                    CoreError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
                    CoreError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
                    CoreError::ExternalLib { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    CoreError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, ErrorResponse::new("core_error", self.to_string(), error_code))
            },
            Self::Store(e) => {
                let status = match e {
                    StoreError::UserNotFound(_) | StoreError::DatasetNotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::CasConflict { .. } | StoreError::CasRetriesExhausted { .. } => {
                        StatusCode::CONFLICT
                    },
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, ErrorResponse::new("store_error", self.to_string(), error_code))
            },
            Self::Broker(e) => {
                let status = match e {
                    BrokerError::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
                    BrokerError::JobNotFound(_) => StatusCode::NOT_FOUND,
                    BrokerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let mut body = ErrorResponse::new("broker_error", self.to_string(), error_code);
                if matches!(e, BrokerError::Backpressure) {
                    body = body.with_retry_after(1);
                }
                (status, body)
            },
            Self::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("config_error", self.to_string(), error_code),
            ),
        };

        (status, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = RuntimeError::Core(CoreError::invalid_query(InvalidQueryReason::BudgetExceeded {
            dataset: "PENGUIN".into(),
        }));
        assert_eq!(err.error_code(), "invalid_query");
    }

    #[test]
    fn backpressure_carries_retry_after() {
        let err = RuntimeError::Broker(BrokerError::Backpressure);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
