//! Axum integration for Tokenwarden.
//!
//! The auth crate never touches HTTP; this crate is the shell around it:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            tokenwarden-web              │  ← cookies, headers, status codes
//! │  - ClientFingerprint extractor          │
//! │  - CookieTransport (SessionTransport)   │
//! │  - require_session middleware           │
//! │  - AppError (AuthError → HTTP)          │
//! ├─────────────────────────────────────────┤
//! │            tokenwarden-auth             │
//! │  - SessionManager, OneTimeTokenService  │  ← lifecycle rules
//! │  - Stores (Redis, PostgreSQL, mocks)    │  ← conditional writes
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **Fingerprint** the client (IP and `User-Agent`)
//! 2. **Read** the session cookie
//! 3. **Validate** through `SessionManager`
//! 4. **Run** the handler with an [`AuthenticatedSession`]
//! 5. **Write back** the refreshed, rotated or cleared cookie
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use tokenwarden_web::{AuthenticatedSession, SessionState, require_session};
//!
//! async fn me(session: AuthenticatedSession) -> String {
//!     session.identity.to_string()
//! }
//!
//! let state = SessionState::new(Arc::new(sessions), config.cookie.clone());
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(state, require_session));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cookies;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod state;

// Re-export key types for convenience
pub use cookies::{CookieTransport, clear_session_cookie, session_cookie};
pub use error::AppError;
pub use extractors::{AuthenticatedSession, ClientFingerprint, ClientIp, UserAgent};
pub use middleware::require_session;
pub use state::SessionState;
