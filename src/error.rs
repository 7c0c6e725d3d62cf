//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it is converted to
//! responses. Component-level failures (provider calls, frame decoding, client
//! transport) have their own `thiserror` types next to the code that raises
//! them; handlers decide which of those become an `AppError`.
//!
//! ## Error Categories:
//! - **ValidationError / BadRequest**: client sent something unusable (400)
//! - **Provider**: an external provider failed before any response byte was sent (500)
//! - **Internal / ConfigError**: server-side problems (500)
//!
//! ## JSON Response Format:
//! Every error renders the same flat body the browser client expects:
//! ```json
//! { "error": "Prompt is required." }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// The wrapped string is the exact message sent to the client, so it must
/// never contain provider payloads or credentials.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (filesystem failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// An external provider call failed before streaming began
    Provider(String),
}

impl AppError {
    /// Client-facing message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg)
            | AppError::Provider(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Provider(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError/Provider → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::ConfigError(_) | AppError::Provider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.message() }))
    }
}

/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed
/// data, so they should result in a 400 rather than a 500.
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

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
