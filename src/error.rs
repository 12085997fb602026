//! # Error Handling
//!
//! HTTP-facing error type for the examination service and its conversion
//! into JSON error responses.
//!
//! ## Key Rust Concepts:
//!
//! ### One enum, many failure modes
//! - Each `AppError` variant is one category of failure the API reports
//! - Variants carry a human-readable message
//! - `match` in `error_response` maps every variant to exactly one status
//!   code, so adding a variant without choosing a status fails to compile
//!
//! ### `From` conversions and `?`
//! - Library errors (`RegistryError`, `ScoringError`, `serde_json::Error`)
//!   convert into `AppError` automatically when a handler uses `?`
//! - The conversion decides the status: an unknown session is a 404, a full
//!   registry is a 503, a bad payload is a 400
//!
//! Collaborator failures never reach this type. They are absorbed by the
//! guarded call layer and turned into fallback values.

use actix_web::{web, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::exam::scoring::ScoringError;
use crate::exam::session::RegistryError;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal** / **ConfigError**: server-side problems (500)
/// - **BadRequest** / **ValidationError**: the client sent bad data (400)
/// - **NotFound**: unknown session (404)
/// - **Conflict**: the session already has a connection (409)
/// - **Unavailable**: session capacity exhausted (503)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("part must be 1, 2 or 3".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    ConfigError(String),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

/// Every error becomes a JSON body of the form:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Session '...' not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

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

/// Malformed JSON from a client is a 400, not a 500.
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

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::NotFound(err.to_string()),
            RegistryError::AlreadyConnected(_) => AppError::Conflict(err.to_string()),
            RegistryError::CapacityReached(_) => AppError::Unavailable(err.to_string()),
            RegistryError::InvalidId(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<ScoringError> for AppError {
    fn from(err: ScoringError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// JSON body extraction whose failures (syntax, missing fields, wrong
/// content type) answer with the same JSON error body as handler errors.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into())
}

/// Query string extraction with JSON error bodies, e.g. `?report=maybe`.
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::ValidationError(err.to_string()).into())
}
