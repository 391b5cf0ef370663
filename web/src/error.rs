//! Error types for web handlers.
//!
//! This module bridges [`AuthError`] and HTTP responses, implementing Axum's
//! `IntoResponse` trait.
//!
//! # Mapping
//!
//! | `AuthError`                              | Status | Code                  |
//! |------------------------------------------|--------|-----------------------|
//! | `InvalidToken`, `FraudDetected`          | 401    | `UNAUTHORIZED`        |
//! | `InvalidCredentials`, `IdentityNotFound` | 401    | `INVALID_CREDENTIALS` |
//! | `OneTimeTokenNotFound`                   | 404    | `NOT_FOUND`           |
//! | `Conflict`                               | 409    | `CONFLICT`            |
//! | `TooManyAttempts`                        | 429    | `TOO_MANY_REQUESTS`   |
//! | everything else                          | 500    | `INTERNAL_SERVER_ERROR` |
//!
//! Invalid and stolen session tokens produce byte-identical responses.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokenwarden_auth::AuthError;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn verify(Json(body): Json<VerifyRequest>) -> Result<StatusCode, AppError> {
///     service
///         .consume(OneTimeTokenType::Verification, &body.code, None)
///         .await?;
///     Ok(StatusCode::NO_CONTENT)
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Seconds for the `Retry-After` header
    retry_after: Option<u64>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            retry_after: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            message.into(),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            message.into(),
            "CONFLICT".to_string(),
        )
    }

    /// Create a 429 Too Many Requests error with a `Retry-After` hint.
    #[must_use]
    pub fn too_many_requests(retry_after: Duration) -> Self {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests".to_string(),
            "TOO_MANY_REQUESTS".to_string(),
        );
        error.retry_after = Some(retry_after.as_secs());
        error
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log internal errors
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken | AuthError::FraudDetected => {
                Self::unauthorized("Authentication required")
            }
            AuthError::InvalidCredentials | AuthError::IdentityNotFound => Self::new(
                StatusCode::UNAUTHORIZED,
                "Invalid credentials".to_string(),
                "INVALID_CREDENTIALS".to_string(),
            ),
            AuthError::OneTimeTokenNotFound => Self::not_found("Code not found or expired"),
            AuthError::Conflict => Self::conflict("Concurrent request on the same session, retry"),
            AuthError::TooManyAttempts { retry_after } => Self::too_many_requests(retry_after),
            other => Self::internal("An internal error occurred").with_source(other.into()),
        }
    }
}
