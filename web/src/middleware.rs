//! Session enforcement middleware.
//!
//! [`require_session`] validates the session cookie, refreshes or rotates
//! it, and signs out stolen or stale cookies.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use tokenwarden_web::middleware::require_session;
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(state, require_session));
//! ```
//!
//! # Session flow
//!
//! 1. **Read** the session cookie (values under the minimum length are ignored)
//! 2. **Validate** it with the client's fingerprint
//! 3. **Accepted**: insert [`AuthenticatedSession`] into request extensions,
//!    run the handler, re-set the cookie with its refreshed expiry (or the
//!    rotated token)
//! 4. **Invalid or stolen**: 401 and a cookie-clearing `Set-Cookie`, with
//!    the same body either way
//! 5. **Concurrent refresh**: 409, cookie untouched

use crate::cookies::CookieTransport;
use crate::error::AppError;
use crate::extractors::{AuthenticatedSession, fingerprint};
use crate::state::SessionState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tokenwarden_auth::{Clock, SessionTokenStore, resume_session};

/// Reject requests without a valid session.
///
/// Install with `axum::middleware::from_fn_with_state(state, require_session)`.
/// Handlers behind it can extract [`AuthenticatedSession`].
pub async fn require_session<S, C>(
    State(state): State<SessionState<S, C>>,
    request: Request,
    next: Next,
) -> Response
where
    S: SessionTokenStore + 'static,
    C: Clock + 'static,
{
    let (mut parts, body) = request.into_parts();
    let jar = CookieJar::from_headers(&parts.headers);
    let mut transport = CookieTransport::new(jar, &state.cookie, fingerprint(&parts));

    match resume_session(&state.sessions, &mut transport, state.context.as_deref()).await {
        Ok(Some(validated)) => {
            let session = AuthenticatedSession::from(&validated.record);
            tracing::debug!(
                identity = %session.identity,
                session_id = %session.session_id,
                "Request authenticated"
            );
            parts.extensions.insert(session);

            let response = next.run(Request::from_parts(parts, body)).await;
            (transport.into_jar(), response).into_response()
        }
        Ok(None) => {
            metrics::counter!("tokenwarden.web.unauthenticated").increment(1);
            AppError::unauthorized("Authentication required").into_response()
        }
        Err(e) => {
            metrics::counter!("tokenwarden.web.rejected").increment(1);
            (transport.into_jar(), AppError::from(e)).into_response()
        }
    }
}
