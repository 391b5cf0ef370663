//! Session cookie transport.
//!
//! [`CookieTransport`] adapts an `axum_extra` [`CookieJar`] to
//! [`SessionTransport`]. Return the jar from
//! [`into_jar`](CookieTransport::into_jar) as part of the response so the
//! `Set-Cookie` headers reach the client.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tokenwarden_auth::{CookieConfig, Fingerprint, SameSitePolicy, SessionTransport};

/// Build the session cookie for `token`, valid for `ttl`.
#[must_use]
pub fn session_cookie(config: &CookieConfig, token: &str, ttl: chrono::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::build((config.name.clone(), token.to_string()))
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(config.same_site))
        .path(config.path.clone())
        .max_age(time::Duration::seconds(ttl.num_seconds()))
        .build();
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Build a cookie that removes the session cookie.
#[must_use]
pub fn clear_session_cookie(config: &CookieConfig) -> Cookie<'static> {
    let mut cookie = Cookie::build((config.name.clone(), ""))
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(config.same_site))
        .path(config.path.clone())
        .max_age(time::Duration::ZERO)
        .build();
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

const fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

/// [`SessionTransport`] over a request's cookie jar.
#[derive(Debug)]
pub struct CookieTransport<'a> {
    jar: CookieJar,
    config: &'a CookieConfig,
    fingerprint: Fingerprint,
}

impl<'a> CookieTransport<'a> {
    /// Wrap the jar of the current request.
    #[must_use]
    pub const fn new(jar: CookieJar, config: &'a CookieConfig, fingerprint: Fingerprint) -> Self {
        Self {
            jar,
            config,
            fingerprint,
        }
    }

    /// Jar with any cookie changes, to be returned with the response.
    #[must_use]
    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl SessionTransport for CookieTransport<'_> {
    fn session_token(&self) -> Option<String> {
        self.jar
            .get(&self.config.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| self.config.accepts(value))
    }

    fn current_fingerprint(&self) -> Fingerprint {
        self.fingerprint.clone()
    }

    fn set_session_cookie(&mut self, token: &str, ttl: chrono::Duration) {
        let jar = std::mem::take(&mut self.jar);
        self.jar = jar.add(session_cookie(self.config, token, ttl));
    }

    fn clear_session_cookie(&mut self) {
        let jar = std::mem::take(&mut self.jar);
        self.jar = jar.add(clear_session_cookie(self.config));
    }
}
