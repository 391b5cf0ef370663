//! PostgreSQL storage implementations.
//!
//! This module provides persistent storage using PostgreSQL for:
//! - Session token records (unique index on the token hash)
//! - One-time codes (rate-limit index on client IP)
//!
//! Both stores share one pool and one migration set (`auth/migrations`).

pub mod otp;
pub mod session;

// Re-exports
pub use otp::PostgresOneTimeTokenStore;
pub use session::PostgresSessionTokenStore;

use crate::error::{AuthError, Result};
use sqlx::PgPool;

/// Run database migrations for both token tables.
///
/// # Errors
///
/// Returns error if migrations fail.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AuthError::DatabaseError(format!("Migration failed: {e}")))?;
    Ok(())
}

/// Map a write error, turning unique violations into `unique`.
fn write_error(e: &sqlx::Error, unique: AuthError, what: &str) -> AuthError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => unique,
        _ => AuthError::DatabaseError(format!("Failed to {what}: {e}")),
    }
}
