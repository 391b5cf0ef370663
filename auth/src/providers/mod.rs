//! Storage providers.
//!
//! The engines depend on these traits, never on a concrete backend. Each
//! backend (in-memory mocks, Redis, PostgreSQL) implements both.
//!
//! # Write discipline
//!
//! Stores never decide lifecycle transitions. They offer exactly the
//! conditional writes the engines need to stay correct under concurrent
//! requests:
//!
//! ```text
//! SessionManager                          OneTimeTokenService
//! ┌──────────────────────────┐            ┌──────────────────────────┐
//! │ insert (unique hash)     │            │ insert                   │
//! │ replace (compare version │            │ count_issued_since (ip)  │
//! │          and hash)       │            │ find (read only)         │
//! └────────────┬─────────────┘            │ consume (used_at IS NULL)│
//!              │                          └────────────┬─────────────┘
//!              ▼                                       ▼
//!     SessionTokenStore                       OneTimeTokenStore
//! ```

pub mod otp_store;
pub mod session_store;

pub use otp_store::OneTimeTokenStore;
pub use session_store::SessionTokenStore;
