//! State for the session middleware.

use std::sync::Arc;
use tokenwarden_auth::{CookieConfig, SessionManager, SystemClock};

/// Everything [`require_session`](crate::middleware::require_session) needs.
///
/// # Examples
///
/// ```ignore
/// use axum::{Router, middleware, routing::get};
/// use tokenwarden_web::{SessionState, middleware::require_session};
///
/// let state = SessionState::new(Arc::new(sessions), config.cookie.clone());
/// let app = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(state, require_session));
/// ```
pub struct SessionState<S, C = SystemClock> {
    /// Session engine.
    pub sessions: Arc<SessionManager<S, C>>,
    /// Cookie settings.
    pub cookie: CookieConfig,
    /// Context sessions on these routes were issued for.
    pub context: Option<String>,
}

impl<S, C> SessionState<S, C> {
    /// Create middleware state for sessions without a context.
    #[must_use]
    pub const fn new(sessions: Arc<SessionManager<S, C>>, cookie: CookieConfig) -> Self {
        Self {
            sessions,
            cookie,
            context: None,
        }
    }

    /// Only accept sessions issued for `context` (e.g. an admin area).
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

// Manual impl: cloning only bumps the `Arc`, whatever `S` and `C` are.
impl<S, C> Clone for SessionState<S, C> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            cookie: self.cookie.clone(),
            context: self.context.clone(),
        }
    }
}
