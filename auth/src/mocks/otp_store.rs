//! Mock one-time token store for testing.

use crate::error::{AuthError, Result};
use crate::models::{OneTimeToken, OneTimeTokenQuery};
use crate::providers::OneTimeTokenStore;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Mock one-time token store.
///
/// In-memory store with atomic single-use semantics: `consume()` matches and
/// marks under one mutex acquisition.
#[derive(Debug, Clone, Default)]
pub struct MockOneTimeTokenStore {
    records: Arc<Mutex<Vec<OneTimeToken>>>,
}

impl MockOneTimeTokenStore {
    /// Create a new mock one-time token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all stored records (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn all(&self) -> Result<Vec<OneTimeToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        Ok(records.clone())
    }

    /// Number of stored records, consumed or not.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn len(&self) -> Result<usize> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        Ok(records.len())
    }

    /// Returns `true` if nothing was ever stored.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn newest_match(
        records: &[OneTimeToken],
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> Option<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, record)| query.matches(record, now))
            .max_by_key(|(_, record)| record.created_at)
            .map(|(index, _)| index)
    }
}

impl OneTimeTokenStore for MockOneTimeTokenStore {
    async fn insert(&self, record: &OneTimeToken) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        records.push(record.clone());
        Ok(())
    }

    async fn count_issued_since(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
        include_used: bool,
    ) -> Result<u64> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        let count = records
            .iter()
            .filter(|record| {
                record.ip_address == Some(ip)
                    && record.created_at >= since
                    && (include_used || record.used_at.is_none())
            })
            .count();
        Ok(count as u64)
    }

    async fn find(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<OneTimeToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        Ok(Self::newest_match(&records, query, now).map(|index| records[index].clone()))
    }

    async fn consume(
        &self,
        query: &OneTimeTokenQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<OneTimeToken>> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        // Atomic match-and-mark under mutex protection
        let Some(index) = Self::newest_match(&records, query, now) else {
            return Ok(None);
        };

        let record = &mut records[index];
        record.used_at = Some(now);
        Ok(Some(record.clone()))
    }
}
