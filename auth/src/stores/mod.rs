//! Storage implementations for the token engines.
//!
//! - **Session Store** (Redis) - Session records with a hash index and Lua compare-and-swap
//! - **One-Time Token Store** (Redis) - Codes with atomic consumption and a per-IP rate index
//! - **PostgreSQL** (feature `postgres`) - Both stores over a relational schema

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod otp_redis;
pub mod session_redis;

// Re-exports
#[cfg(feature = "postgres")]
pub use postgres::{PostgresOneTimeTokenStore, PostgresSessionTokenStore};
pub use otp_redis::RedisOneTimeTokenStore;
pub use session_redis::RedisSessionTokenStore;
