//! One-time token store trait.

use crate::error::Result;
use crate::models::{OneTimeToken, OneTimeTokenQuery};
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Persistent storage for one-time token records.
///
/// # Security Requirements
///
/// 1. **Atomicity**: `consume()` must match and mark in one conditional
///    write guarded by `used_at IS NULL`. A read followed by a write lets two
///    concurrent requests spend the same code.
/// 2. **Indistinguishability**: a missing, used, expired or mismatched code
///    is reported the same way (`Ok(None)`).
/// 3. **Hash only**: the raw code never reaches the store.
pub trait OneTimeTokenStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn insert(
        &self,
        record: &OneTimeToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Count records created by `ip` at or after `since`.
    ///
    /// Consumed records are counted only when `include_used` is set.
    ///
    /// The engine counts and then inserts in two calls, so requests from one
    /// IP that race each other can each see the count below the limit. The
    /// limit may be exceeded by at most the number of such concurrent requests.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn count_issued_since(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
        include_used: bool,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Find an unconsumed record matching `query` that is valid at `now`.
    ///
    /// Read only. When several records match, the most recently issued wins.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn find(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<OneTimeToken>>> + Send;

    /// Atomically find an unconsumed record matching `query` and set its
    /// `used_at` to `now`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: this call consumed the record (`used_at` set)
    /// - `Ok(None)`: no match, or a concurrent call consumed it first
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    fn consume(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<OneTimeToken>>> + Send;
}
