//! Mock provider implementations for testing.
//!
//! This module provides simple, in-memory implementations of the store
//! traits and the host-side adapters for use in unit and integration tests.
//! The stores honour the same conditional-write contracts as the Redis and
//! PostgreSQL backends, so concurrency properties can be tested without a
//! server.

pub mod clock;
pub mod events;
pub mod identity;
pub mod otp_store;
pub mod session_store;
pub mod transport;

pub use clock::ManualClock;
pub use events::RecordingEventSink;
pub use identity::{MockCredentialVerifier, MockIdentityResolver};
pub use otp_store::MockOneTimeTokenStore;
pub use session_store::MockSessionTokenStore;
pub use transport::MockTransport;
