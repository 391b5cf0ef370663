//! Error types for session and one-time token operations.

use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for the token lifecycle.
///
/// Variants are grouped by the component that raises them. The web layer maps
/// `InvalidToken` and `FraudDetected` to the same response so a client cannot
/// tell which one occurred.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// Credentials were rejected by the credential verifier.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The identity referenced by a token no longer resolves.
    #[error("Identity not found")]
    IdentityNotFound,

    // ═══════════════════════════════════════════════════════════
    // Session Errors
    // ═══════════════════════════════════════════════════════════

    /// Session token is absent, malformed, expired or out of context.
    #[error("Invalid session token")]
    InvalidToken,

    /// Session token was presented from a fingerprint the fraud policy rejects.
    ///
    /// The session has already been invalidated when this is returned.
    #[error("Session token fraud detected")]
    FraudDetected,

    // ═══════════════════════════════════════════════════════════
    // One-Time Token Errors
    // ═══════════════════════════════════════════════════════════

    /// No unused, unexpired one-time token matched the lookup.
    ///
    /// Deliberately covers "never existed", "already used" and "expired".
    #[error("One-time token not found")]
    OneTimeTokenNotFound,

    /// Too many one-time tokens were requested from the same address.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    TooManyAttempts {
        /// Duration to wait before retrying
        retry_after: std::time::Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Store Errors
    // ═══════════════════════════════════════════════════════════

    /// A record with the same token hash already exists.
    #[error("Token hash collision")]
    TokenCollision,

    /// A conditional write lost against a concurrent writer.
    #[error("Concurrent modification conflict")]
    Conflict,

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Record (de)serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Misconfiguration or exhausted entropy. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Returns `true` if this error is caused by what the client presented.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tokenwarden_auth::AuthError;
    /// assert!(AuthError::InvalidCredentials.is_user_error());
    /// assert!(!AuthError::Conflict.is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::InvalidToken
                | Self::OneTimeTokenNotFound
                | Self::TooManyAttempts { .. }
        )
    }

    /// Returns `true` if this error should surface as a security event.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tokenwarden_auth::AuthError;
    /// assert!(AuthError::FraudDetected.is_security_issue());
    /// assert!(!AuthError::InvalidToken.is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(self, Self::FraudDetected | Self::TooManyAttempts { .. })
    }

    /// Returns `true` for transient store failures that may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::TokenCollision)
    }

    /// Returns `true` if the client-side session must be cleared.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tokenwarden_auth::AuthError;
    /// assert!(AuthError::InvalidToken.signs_out_client());
    /// assert!(AuthError::FraudDetected.signs_out_client());
    /// assert!(!AuthError::OneTimeTokenNotFound.signs_out_client());
    /// ```
    #[must_use]
    pub const fn signs_out_client(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::FraudDetected)
    }
}
