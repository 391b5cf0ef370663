//! Login flow on top of the two engines.
//!
//! [`Authenticator`] accepts either primary credentials or a one-time LOGIN
//! code, resolves the identity, and issues a session:
//!
//! ```text
//! authenticate(identifier, secret)
//!   │
//!   ├─ secret = None ───────▶ identifier is an unbound LOGIN code
//!   │                         peek ▶ resolve identity ▶ consume
//!   │
//!   └─ secret = Some(s) ────▶ CredentialVerifier::verify(identifier, s)
//!                               ├─ Ok ──────────────────▶ resolve identity
//!                               └─ InvalidCredentials ──▶ s is a LOGIN code
//!                                                         bound to identifier
//!                                                         peek ▶ resolve ▶ consume
//! ```
//!
//! A code is consumed only after its identity resolved, so a code pointing
//! at a deleted account is not burnt.

use crate::environment::{Clock, SystemClock};
use crate::error::{AuthError, Result};
use crate::fraud::Fingerprint;
use crate::identity::{CredentialVerifier, IdentityRef, IdentityResolver};
use crate::models::{Metadata, OneTimeTokenType, SessionToken};
use crate::otp::OneTimeTokenService;
use crate::providers::{OneTimeTokenStore, SessionTokenStore};
use crate::session::{SessionManager, ValidatedSession};
use std::fmt;

/// How a principal proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Primary credentials accepted by the [`CredentialVerifier`].
    Credentials,

    /// One-time LOGIN code.
    OneTimeCode,
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated<I> {
    /// Reference stored in session records.
    pub reference: IdentityRef,

    /// Resolved identity.
    pub identity: I,

    /// How the principal authenticated.
    pub method: AuthMethod,
}

/// Successful login: a new session for an authenticated principal.
#[derive(Clone)]
pub struct LoginOutcome<I> {
    /// Raw session token for the transport to hand to the client.
    pub token: String,

    /// Stored session record.
    pub session: SessionToken,

    /// Authentication details.
    pub authenticated: Authenticated<I>,
}

impl<I: fmt::Debug> fmt::Debug for LoginOutcome<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginOutcome")
            .field("token", &"<redacted>")
            .field("session", &self.session)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Validated session with its resolved identity.
#[derive(Debug, Clone)]
pub struct ResumedSession<I> {
    /// Validation result, including any rotated token.
    pub session: ValidatedSession,

    /// Resolved identity.
    pub identity: I,
}

/// Login facade combining the session and one-time token engines with the
/// host's credential verifier and identity resolver.
pub struct Authenticator<S, O, V, R, C = SystemClock> {
    sessions: SessionManager<S, C>,
    one_time_tokens: OneTimeTokenService<O, C>,
    verifier: V,
    resolver: R,
}

impl<S, O, V, R, C> Authenticator<S, O, V, R, C>
where
    S: SessionTokenStore,
    O: OneTimeTokenStore,
    V: CredentialVerifier,
    R: IdentityResolver,
    C: Clock,
{
    /// Create an authenticator.
    #[must_use]
    pub const fn new(
        sessions: SessionManager<S, C>,
        one_time_tokens: OneTimeTokenService<O, C>,
        verifier: V,
        resolver: R,
    ) -> Self {
        Self {
            sessions,
            one_time_tokens,
            verifier,
            resolver,
        }
    }

    /// Session engine.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager<S, C> {
        &self.sessions
    }

    /// One-time token engine.
    #[must_use]
    pub const fn one_time_tokens(&self) -> &OneTimeTokenService<O, C> {
        &self.one_time_tokens
    }

    /// Identity resolver.
    #[must_use]
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Verify a credential pair or a LOGIN code.
    ///
    /// # Errors
    ///
    /// - Neither the credentials nor a LOGIN code are accepted → `AuthError::InvalidCredentials`
    /// - LOGIN code unbound, or its identity vanished → `AuthError::IdentityNotFound`
    /// - Adapter or store failure → that error
    pub async fn authenticate(
        &self,
        identifier: &str,
        secret: Option<&str>,
        context: Option<&str>,
    ) -> Result<Authenticated<R::Identity>> {
        let Some(secret) = secret else {
            return self.redeem_login_code(identifier, None).await;
        };

        match self.verifier.verify(identifier, secret, context).await {
            Ok(reference) => {
                let identity = self
                    .resolver
                    .resolve(&reference)
                    .await?
                    .ok_or(AuthError::IdentityNotFound)?;

                Ok(Authenticated {
                    reference,
                    identity,
                    method: AuthMethod::Credentials,
                })
            }
            Err(AuthError::InvalidCredentials) => {
                self.redeem_login_code(secret, Some(identifier)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate and issue a session.
    ///
    /// # Errors
    ///
    /// Any error of [`authenticate`](Self::authenticate) or
    /// [`SessionManager::issue`].
    pub async fn login(
        &self,
        identifier: &str,
        secret: Option<&str>,
        context: Option<&str>,
        metadata: Metadata,
        fingerprint: Fingerprint,
    ) -> Result<LoginOutcome<R::Identity>> {
        let authenticated = self.authenticate(identifier, secret, context).await?;

        let issued = self
            .sessions
            .issue(
                authenticated.reference.clone(),
                fingerprint,
                context.map(str::to_string),
                metadata,
            )
            .await?;

        tracing::info!(
            identity = %authenticated.reference,
            method = ?authenticated.method,
            session_id = %issued.record.id,
            "Login succeeded"
        );

        Ok(LoginOutcome {
            token: issued.token,
            session: issued.record,
            authenticated,
        })
    }

    /// Validate a session token and resolve its identity.
    ///
    /// A session whose identity no longer exists is invalidated.
    ///
    /// # Errors
    ///
    /// Any error of [`SessionManager::validate`]; `AuthError::InvalidToken`
    /// if the identity vanished.
    pub async fn resume(
        &self,
        raw_token: &str,
        fingerprint: &Fingerprint,
        context: Option<&str>,
    ) -> Result<ResumedSession<R::Identity>> {
        let session = self.sessions.validate(raw_token, fingerprint, context).await?;

        if let Some(identity) = self.resolver.resolve(session.identity()).await? {
            return Ok(ResumedSession { session, identity });
        }

        tracing::warn!(
            identity = %session.identity(),
            session_id = %session.record.id,
            "Session identity no longer exists, invalidating"
        );
        self.sessions.invalidate_session(session.record.id).await?;
        Err(AuthError::InvalidToken)
    }

    /// Sign out the client holding `raw_token`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn logout(&self, raw_token: &str) -> Result<bool> {
        self.sessions.invalidate_token(raw_token).await
    }

    async fn redeem_login_code(
        &self,
        code: &str,
        identifier: Option<&str>,
    ) -> Result<Authenticated<R::Identity>> {
        let record = self
            .one_time_tokens
            .peek(OneTimeTokenType::Login, code, identifier)
            .await
            .map_err(not_found_as_invalid_credentials)?;

        let reference = record.identity.ok_or(AuthError::IdentityNotFound)?;
        let identity = self
            .resolver
            .resolve(&reference)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;

        self.one_time_tokens
            .consume(OneTimeTokenType::Login, code, identifier)
            .await
            .map_err(not_found_as_invalid_credentials)?;

        Ok(Authenticated {
            reference,
            identity,
            method: AuthMethod::OneTimeCode,
        })
    }
}

fn not_found_as_invalid_credentials(error: AuthError) -> AuthError {
    match error {
        AuthError::OneTimeTokenNotFound => AuthError::InvalidCredentials,
        other => other,
    }
}
