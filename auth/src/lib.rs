//! # Tokenwarden Authentication Tokens
//!
//! Server-side session tokens and single-use verification codes for web
//! applications that bring their own user model.
//!
//! ## Features
//!
//! - **Opaque session tokens**: only a SHA-256 hash is stored
//! - **Sliding expiry**: every successful validation extends the session
//! - **Fraud detection**: a session presented from a foreign fingerprint is revoked
//! - **Optional rotation**: a fresh token on every validation
//! - **One-time codes**: login, verification, recovery and signup codes with per-IP rate limiting
//! - **Testable**: in-memory stores and a manual clock behind `test-utils`
//!
//! ## Architecture
//!
//! The engines ([`SessionManager`], [`OneTimeTokenService`]) hold every
//! lifecycle rule. Stores only persist records and expose conditional writes:
//!
//! ```text
//! Request → SessionTransport → SessionManager → SessionTokenStore (CAS)
//!                                     ↓
//!                             SecurityEventSink
//! ```
//!
//! ## Example: Login and resume
//!
//! ```rust,ignore
//! use tokenwarden_auth::*;
//!
//! let sessions = SessionManager::new(store, SessionConfig::default());
//! let issued = sessions
//!     .issue(IdentityRef::new("user", "42"), fingerprint, None, Metadata::new())
//!     .await?;
//!
//! // Later, on every request:
//! let validated = sessions.validate(&issued.token, &fingerprint, None).await?;
//! assert_eq!(validated.identity(), &IdentityRef::new("user", "42"));
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod authenticator;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod fraud;
pub mod identity;
pub mod models;
pub mod otp;
pub mod providers;
pub mod session;
pub mod stores;
pub mod token;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use authenticator::{AuthMethod, Authenticated, Authenticator, LoginOutcome, ResumedSession};
pub use config::{CookieConfig, OtpConfig, SameSitePolicy, SessionConfig, TokenwardenConfig};
pub use environment::{Clock, SystemClock};
pub use error::{AuthError, Result};
pub use events::{SecurityEvent, SecurityEventSink, TracingEventSink};
pub use fraud::{Fingerprint, FraudPolicy, FraudPolicyKind};
pub use identity::{CredentialVerifier, IdentityRef, IdentityResolver};
pub use models::{
    Metadata, OneTimeToken, OneTimeTokenId, OneTimeTokenQuery, OneTimeTokenType, SessionToken,
    SessionTokenId,
};
pub use otp::{IssueOneTimeToken, OneTimeTokenService};
pub use providers::{OneTimeTokenStore, SessionTokenStore};
pub use session::{IssuedSession, SessionManager, ValidatedSession};
pub use token::{MIN_TOKEN_LENGTH, TokenHash};
pub use transport::{SessionTransport, resume_session};
