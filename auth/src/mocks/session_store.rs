//! Mock session token store for testing.

use crate::error::{AuthError, Result};
use crate::identity::IdentityRef;
use crate::models::{Metadata, SessionToken, SessionTokenId, metadata_contains};
use crate::providers::SessionTokenStore;
use crate::token::TokenHash;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Mock session token store.
///
/// In-memory store with the same compare-and-swap semantics as the real
/// backends. Failures can be queued with [`fail_next_insert`] and
/// [`fail_next_replace`] to exercise the engine's retry paths.
///
/// [`fail_next_insert`]: Self::fail_next_insert
/// [`fail_next_replace`]: Self::fail_next_replace
#[derive(Debug, Clone, Default)]
pub struct MockSessionTokenStore {
    records: Arc<Mutex<HashMap<SessionTokenId, SessionToken>>>,
    insert_failures: Arc<Mutex<VecDeque<AuthError>>>,
    replace_failures: Arc<Mutex<VecDeque<AuthError>>>,
}

impl MockSessionTokenStore {
    /// Create a new mock session token store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert()` fail with `error`. Queued failures are used in order.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn fail_next_insert(&self, error: AuthError) -> Result<()> {
        self.insert_failures
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .push_back(error);
        Ok(())
    }

    /// Make the next `replace()` fail with `error`. Queued failures are used in order.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn fail_next_replace(&self, error: AuthError) -> Result<()> {
        self.replace_failures
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .push_back(error);
        Ok(())
    }

    /// Get all stored records (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn all(&self) -> Result<Vec<SessionToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        Ok(records.values().cloned().collect())
    }

    fn take_failure(queue: &Mutex<VecDeque<AuthError>>) -> Result<Option<AuthError>> {
        Ok(queue
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .pop_front())
    }
}

impl SessionTokenStore for MockSessionTokenStore {
    async fn insert(&self, record: &SessionToken) -> Result<()> {
        if let Some(error) = Self::take_failure(&self.insert_failures)? {
            return Err(error);
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        if records
            .values()
            .any(|existing| existing.token_hash == record.token_hash)
        {
            return Err(AuthError::TokenCollision);
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        Ok(records
            .values()
            .find(|record| &record.token_hash == token_hash && record.is_active(now))
            .cloned())
    }

    async fn find_by_id(&self, id: SessionTokenId) -> Result<Option<SessionToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        Ok(records.get(&id).cloned())
    }

    async fn find_active_by_identity(
        &self,
        identity: &IdentityRef,
        metadata_filter: &Metadata,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionToken>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        let mut matching: Vec<SessionToken> = records
            .values()
            .filter(|record| {
                &record.identity == identity
                    && record.is_active(now)
                    && metadata_contains(&record.metadata, metadata_filter)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.created_at);
        Ok(matching)
    }

    async fn replace(
        &self,
        expected_hash: &TokenHash,
        expected_version: u64,
        record: &SessionToken,
    ) -> Result<()> {
        if let Some(error) = Self::take_failure(&self.replace_failures)? {
            return Err(error);
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        // Compare-and-swap under mutex protection
        let unchanged = records.get(&record.id).is_some_and(|current| {
            &current.token_hash == expected_hash && current.version == expected_version
        });
        if !unchanged {
            return Err(AuthError::Conflict);
        }

        if &record.token_hash != expected_hash
            && records
                .values()
                .any(|other| other.id != record.id && other.token_hash == record.token_hash)
        {
            return Err(AuthError::TokenCollision);
        }

        records.insert(record.id, record.clone());
        Ok(())
    }
}
