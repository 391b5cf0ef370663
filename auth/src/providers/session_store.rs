//! Session token store trait.

use crate::error::Result;
use crate::identity::IdentityRef;
use crate::models::{Metadata, SessionToken, SessionTokenId};
use crate::token::TokenHash;
use chrono::{DateTime, Utc};

/// Persistent storage for session token records.
///
/// # Implementation Notes
///
/// - Records are never physically deleted by the engine; invalidation is a
///   [`replace`](Self::replace) that moves `valid_until` to "now".
/// - Lookups by hash go through an index (unique on `token_hash`).
/// - **CRITICAL**: `replace()` MUST be a compare-and-swap on
///   (`id`, current hash, `version`). Two validators racing on the same
///   record must not both succeed.
pub trait SessionTokenStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - A record with the same `token_hash` exists → `AuthError::TokenCollision`
    /// - Transient backend contention → `AuthError::Conflict`
    /// - Storage failure → `AuthError::DatabaseError`
    fn insert(
        &self,
        record: &SessionToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Find the record whose hash is `token_hash` and which is still active at `now`.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn find_active(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<SessionToken>>> + Send;

    /// Find a record by identifier regardless of its validity.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn find_by_id(
        &self,
        id: SessionTokenId,
    ) -> impl std::future::Future<Output = Result<Option<SessionToken>>> + Send;

    /// List the records of `identity` active at `now` whose metadata contains
    /// every entry of `metadata_filter`.
    ///
    /// An empty filter matches every record.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn find_active_by_identity(
        &self,
        identity: &IdentityRef,
        metadata_filter: &Metadata,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<SessionToken>>> + Send;

    /// Replace a record, conditional on it being unchanged since it was read.
    ///
    /// The stored record with id `record.id` is overwritten only if its
    /// current hash is `expected_hash` and its version is `expected_version`.
    /// `record.token_hash` may differ from `expected_hash` (rotation); the
    /// hash index is moved atomically with the write.
    ///
    /// # Errors
    ///
    /// - Record missing or modified concurrently → `AuthError::Conflict`
    /// - New hash already taken → `AuthError::TokenCollision`
    /// - Storage failure → `AuthError::DatabaseError`
    fn replace(
        &self,
        expected_hash: &TokenHash,
        expected_version: u64,
        record: &SessionToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
