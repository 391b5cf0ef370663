//! Mock identity adapters.

use crate::error::{AuthError, Result};
use crate::identity::{CredentialVerifier, IdentityRef, IdentityResolver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory identity directory.
///
/// Resolves references registered with [`insert`](Self::insert) to a clone
/// of the stored identity.
#[derive(Debug, Clone)]
pub struct MockIdentityResolver<I> {
    identities: Arc<Mutex<HashMap<IdentityRef, I>>>,
}

impl<I> MockIdentityResolver<I> {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identities: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register an identity.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn insert(&self, reference: IdentityRef, identity: I) -> Result<()> {
        self.identities
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .insert(reference, identity);
        Ok(())
    }

    /// Remove an identity, simulating a deleted account.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn remove(&self, reference: &IdentityRef) -> Result<()> {
        self.identities
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .remove(reference);
        Ok(())
    }
}

impl<I> Default for MockIdentityResolver<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone + Send + Sync> IdentityResolver for MockIdentityResolver<I> {
    type Identity = I;

    async fn resolve(&self, identity: &IdentityRef) -> Result<Option<I>> {
        let identities = self
            .identities
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;
        Ok(identities.get(identity).cloned())
    }
}

/// In-memory credential verifier.
///
/// Accepts exactly the (identifier, secret) pairs registered with
/// [`add_user`](Self::add_user). Contexts are ignored.
#[derive(Debug, Clone, Default)]
pub struct MockCredentialVerifier {
    users: Arc<Mutex<HashMap<String, (String, IdentityRef)>>>,
}

impl MockCredentialVerifier {
    /// Create a verifier with no users.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns error if the mutex is poisoned.
    pub fn add_user(
        &self,
        identifier: impl Into<String>,
        secret: impl Into<String>,
        identity: IdentityRef,
    ) -> Result<()> {
        self.users
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?
            .insert(identifier.into(), (secret.into(), identity));
        Ok(())
    }
}

impl CredentialVerifier for MockCredentialVerifier {
    async fn verify(
        &self,
        identifier: &str,
        secret: &str,
        _context: Option<&str>,
    ) -> Result<IdentityRef> {
        let users = self
            .users
            .lock()
            .map_err(|_| AuthError::InternalError("Mutex lock failed".into()))?;

        match users.get(identifier) {
            Some((expected, identity))
                if constant_time_eq::constant_time_eq(expected.as_bytes(), secret.as_bytes()) =>
            {
                Ok(identity.clone())
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}
