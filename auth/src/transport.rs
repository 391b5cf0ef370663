//! Client-side session persistence.
//!
//! The engines never touch HTTP. They return tokens and decisions; a
//! [`SessionTransport`] implementation (cookies in `tokenwarden-web`) applies
//! them to the response.

use crate::environment::Clock;
use crate::error::Result;
use crate::fraud::Fingerprint;
use crate::providers::SessionTokenStore;
use crate::session::{SessionManager, ValidatedSession};
use chrono::Duration;

/// Carries the session token between client and server.
pub trait SessionTransport {
    /// Token presented by the client.
    ///
    /// Implementations return `None` for values shorter than the configured
    /// minimum length so obviously forged values never reach the store.
    fn session_token(&self) -> Option<String>;

    /// Fingerprint of the current request.
    fn current_fingerprint(&self) -> Fingerprint;

    /// Persist `token` on the client for `ttl`.
    fn set_session_cookie(&mut self, token: &str, ttl: Duration);

    /// Remove the token from the client.
    fn clear_session_cookie(&mut self);
}

/// Validate the session carried by `transport` and apply the outcome to it.
///
/// - No candidate token → `Ok(None)`, transport untouched.
/// - Accepted → the (possibly rotated) token is re-set, living exactly as long
///   as the refreshed record.
/// - `InvalidToken` / `FraudDetected` → the token is cleared and the error
///   returned. Callers must not tell the client which one occurred.
/// - Any other error (e.g. a concurrent refresh) → returned, token kept.
///
/// # Errors
///
/// Any error of [`SessionManager::validate`].
pub async fn resume_session<S, C, T>(
    sessions: &SessionManager<S, C>,
    transport: &mut T,
    context: Option<&str>,
) -> Result<Option<ValidatedSession>>
where
    S: SessionTokenStore,
    C: Clock,
    T: SessionTransport + Send,
{
    let Some(token) = transport.session_token() else {
        return Ok(None);
    };
    let fingerprint = transport.current_fingerprint();

    match sessions.validate(&token, &fingerprint, context).await {
        Ok(validated) => {
            let current = validated.rotated_token.as_deref().unwrap_or(&token);
            let ttl = sessions.remaining_validity(&validated.record);
            transport.set_session_cookie(current, ttl);
            Ok(Some(validated))
        }
        Err(e) if e.signs_out_client() => {
            transport.clear_session_cookie();
            Err(e)
        }
        Err(e) => Err(e),
    }
}
