//! Mock session transport.

use crate::fraud::Fingerprint;
use crate::token::MIN_TOKEN_LENGTH;
use crate::transport::SessionTransport;
use chrono::Duration;

/// In-memory stand-in for a cookie jar.
#[derive(Debug, Clone)]
pub struct MockTransport {
    presented: Option<String>,
    fingerprint: Fingerprint,
    cookie: Option<(String, Duration)>,
    cleared: bool,
}

impl MockTransport {
    /// Request presenting `token` from `fingerprint`.
    #[must_use]
    pub const fn new(token: Option<String>, fingerprint: Fingerprint) -> Self {
        Self {
            presented: token,
            fingerprint,
            cookie: None,
            cleared: false,
        }
    }

    /// Cookie set on the response, with its TTL.
    #[must_use]
    pub fn cookie(&self) -> Option<(String, Duration)> {
        self.cookie.clone()
    }

    /// Whether the response clears the cookie.
    #[must_use]
    pub const fn cleared(&self) -> bool {
        self.cleared
    }
}

impl SessionTransport for MockTransport {
    fn session_token(&self) -> Option<String> {
        self.presented
            .clone()
            .filter(|token| token.len() >= MIN_TOKEN_LENGTH)
    }

    fn current_fingerprint(&self) -> Fingerprint {
        self.fingerprint.clone()
    }

    fn set_session_cookie(&mut self, token: &str, ttl: Duration) {
        self.cookie = Some((token.to_string(), ttl));
        self.cleared = false;
    }

    fn clear_session_cookie(&mut self) {
        self.cookie = None;
        self.cleared = true;
    }
}
