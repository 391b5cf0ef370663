//! Identity references and the adapters that resolve them.
//!
//! A token record never embeds the principal it authenticates. It stores an
//! [`IdentityRef`], a (type tag, key) pair that only the embedding
//! application knows how to turn back into a full identity.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged reference to an authenticated principal.
///
/// `object_class` names the kind of principal (e.g. `"user"`, `"api_client"`),
/// `object_id` is its primary key rendered as a string. Neither is interpreted
/// by the token engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityRef {
    /// Type tag of the principal.
    pub object_class: String,

    /// Primary key of the principal.
    pub object_id: String,
}

impl IdentityRef {
    /// Create a new identity reference.
    #[must_use]
    pub fn new(object_class: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_class: object_class.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_class, self.object_id)
    }
}

/// Resolves identity references back into application identities.
///
/// Owned by the embedding application. Called only after a session or
/// one-time token lookup has already succeeded.
pub trait IdentityResolver: Send + Sync {
    /// The application's identity type.
    type Identity: Send;

    /// Resolve a reference.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the principal no longer exists.
    ///
    /// # Errors
    ///
    /// Returns error if the backing lookup fails.
    fn resolve(
        &self,
        identity: &IdentityRef,
    ) -> impl std::future::Future<Output = Result<Option<Self::Identity>>> + Send;
}

/// Verifies primary credentials (password, SSO assertion, ...).
///
/// The engines never inspect how verification is done.
pub trait CredentialVerifier: Send + Sync {
    /// Verify credentials for `identifier`.
    ///
    /// # Errors
    ///
    /// - Unknown identifier or wrong secret → `AuthError::InvalidCredentials`
    /// - Backend failure → any other variant
    fn verify(
        &self,
        identifier: &str,
        secret: &str,
        context: Option<&str>,
    ) -> impl std::future::Future<Output = Result<IdentityRef>> + Send;
}
