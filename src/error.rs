//! # Error Handling
//!
//! This module defines the application error type and how it's converted to HTTP responses.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **Data**: Each variant carries the human-readable message sent to the client
//! - **Pattern matching**: `match` maps each variant to a status code
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` turn database, IO and HTTP client errors into `AppError`
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest** / **ValidationError**: Client sent invalid data (400)
/// - **Unauthorized**: No valid session (401)
/// - **Forbidden**: Authenticated but not allowed (403)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **Conflict**: Unique constraint violated (409)
/// - **PayloadTooLarge**: Upload exceeds the configured limit (413)
/// - **RangeNotSatisfiable**: Byte range outside the file (416)
/// - **ConfigError**: Configuration problems (500)
/// - **Upstream**: The transcription provider failed (502)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Forbidden("Admin access required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ValidationError(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    /// Carries the full file length for the `Content-Range: bytes */len` header
    RangeNotSatisfiable(u64),
    ConfigError(String),
    Upstream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::RangeNotSatisfiable(len) => write!(f, "Range not satisfiable for {} bytes", len),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable error type and the message shown to clients.
    fn parts(&self) -> (&'static str, String) {
        match self {
            AppError::Internal(msg) => ("internal_error", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
            AppError::Unauthorized(msg) => ("unauthorized", msg.clone()),
            AppError::Forbidden(msg) => ("forbidden", msg.clone()),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::Conflict(msg) => ("conflict", msg.clone()),
            AppError::PayloadTooLarge(msg) => ("payload_too_large", msg.clone()),
            AppError::RangeNotSatisfiable(_) => ("range_not_satisfiable", "Requested range not satisfiable".to_string()),
            AppError::ConfigError(msg) => ("config_error", msg.clone()),
            AppError::Upstream(msg) => ("upstream_error", msg.clone()),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "success": false,
///   "error": {
///     "type": "not_found",
///     "message": "User not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = self.parts();
        let mut builder = HttpResponse::build(self.status_code());

        if let AppError::RangeNotSatisfiable(len) = self {
            builder.insert_header((header::CONTENT_RANGE, format!("bytes */{}", len)));
        }

        builder.json(json!({
            "success": false,
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

/// JSON parsing errors are almost always the client's fault, so they map to 400.
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

/// Database errors. Unique constraint violations are the one case the client
/// can fix (pick another username or email), so they become 409.
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return AppError::Conflict("Username or email already exists".to_string());
            }
        }
        AppError::Internal(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("Storage error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(format!("Transcription request failed: {}", err))
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
