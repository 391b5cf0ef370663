//! Custom Axum extractors.
//!
//! This module contains custom extractors for common HTTP patterns:
//! - `ClientIp`: Extract client IP address from headers or connection
//! - `UserAgent`: Extract User-Agent header
//! - `ClientFingerprint`: IP and User-Agent combined for fraud checks
//! - `AuthenticatedSession`: The session validated by
//!   [`require_session`](crate::middleware::require_session)
//!
//! # Examples
//!
//! ```ignore
//! use tokenwarden_web::extractors::{AuthenticatedSession, ClientFingerprint};
//!
//! async fn me(session: AuthenticatedSession) -> String {
//!     session.identity.to_string()
//! }
//!
//! async fn login(ClientFingerprint(fingerprint): ClientFingerprint) -> Result<CookieJar, AppError> {
//!     let outcome = authenticator.login(&email, Some(&password), None, Metadata::new(), fingerprint).await?;
//!     // ...
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, header::USER_AGENT, request::Parts},
};
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokenwarden_auth::{Fingerprint, IdentityRef, SessionToken, SessionTokenId};

/// Client IP address.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Connection IP (requires `into_make_service_with_connect_info`)
/// 4. `127.0.0.1`
///
/// Only deploy behind a proxy that overwrites these headers: the IP feeds
/// both fraud detection and one-time code rate limiting.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(&parts.headers, &parts.extensions)))
    }
}

/// Extract client IP from headers or connection info.
pub(crate) fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip;
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |ConnectInfo(addr)| addr.ip())
}

/// User-Agent header, `None` when absent or not valid UTF-8.
#[derive(Debug, Clone)]
pub struct UserAgent(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(user_agent(&parts.headers)))
    }
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Fingerprint of the requesting client.
#[derive(Debug, Clone)]
pub struct ClientFingerprint(pub Fingerprint);

#[async_trait]
impl<S> FromRequestParts<S> for ClientFingerprint
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(fingerprint(parts)))
    }
}

/// Build the fingerprint of a request.
pub(crate) fn fingerprint(parts: &Parts) -> Fingerprint {
    Fingerprint {
        ip: client_ip(&parts.headers, &parts.extensions),
        user_agent: user_agent(&parts.headers),
    }
}

/// Session accepted by the session middleware.
///
/// Rejects with 401 when the route is not behind
/// [`require_session`](crate::middleware::require_session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// Session record identifier
    pub session_id: SessionTokenId,
    /// Authenticated principal
    pub identity: IdentityRef,
    /// Context the session was issued for
    pub context: Option<String>,
    /// Expiry after this request's refresh
    pub valid_until: DateTime<Utc>,
}

impl From<&SessionToken> for AuthenticatedSession {
    fn from(record: &SessionToken) -> Self {
        Self {
            session_id: record.id,
            identity: record.identity.clone(),
            context: record.context.clone(),
            valid_until: record.valid_until,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}
