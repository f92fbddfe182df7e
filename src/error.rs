//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **`AppError`**: failures surfaced over plain HTTP (health, config, upgrade refusal)
//!   and during startup. These convert into JSON error responses.
//! - **`SessionError`** / **`ProviderError`**: failures inside a live voice session.
//!   These never reach an HTTP response; the session orchestrator maps each variant
//!   onto a recovery decision (drop the message, abandon the turn, or tear down).
//!
//! ## Key Rust Concepts:
//! - **thiserror**: derives `Display` and `std::error::Error` from `#[error(...)]` attributes
//! - **`#[from]`**: generates the `From` impl so `?` converts errors automatically
//! - **ResponseError trait**: converts errors to HTTP responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors returned from HTTP handlers and startup code.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **ConfigError**: Configuration problems (500)
/// - **NotFound**: Unknown session endpoint (404)
/// - **ServiceUnavailable**: Session capacity exhausted (503)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Maps each error onto a status code and the shared JSON error envelope:
///
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent sessions reached (10)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON errors are almost always malformed client input, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Failure of a single call to an external transcription, generation or
/// synthesis service. Never retried.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never completed (DNS, TLS, connection reset, ...).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered 2xx but the payload was unusable.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// HTTP status if the provider produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Request(err) => err.status().map(|s| s.as_u16()),
            ProviderError::Malformed(_) => None,
        }
    }
}

/// Error taxonomy for a live session.
///
/// | Variant        | Session reaction                                  |
/// |----------------|---------------------------------------------------|
/// | `Validation`   | input rejected before any network call; continue  |
/// | `Provider`     | short notice to client, turn abandoned; continue  |
/// | `Transport`    | immediate teardown with reason `error`            |
/// | `Disconnected` | teardown with reason `disconnected`               |
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client disconnected")]
    Disconnected,
}

impl SessionError {
    /// Whether this error ends the session rather than just the current turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!SessionError::Validation("empty".into()).is_fatal());
        assert!(!SessionError::Provider(ProviderError::Malformed("x".into())).is_fatal());
        assert!(SessionError::Transport("broken pipe".into()).is_fatal());
        assert!(SessionError::Disconnected.is_fatal());
    }

    #[test]
    fn test_provider_status_display() {
        let err = ProviderError::Status {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "provider returned 503: overloaded");

        let wrapped: SessionError = err.into();
        assert_eq!(wrapped.to_string(), "provider returned 503: overloaded");
    }

    #[test]
    fn test_service_unavailable_response() {
        let err = AppError::ServiceUnavailable("full".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
