//! One-time token issuance and consumption.
//!
//! One-time codes back passwordless login links, password resets and
//! verification flows. Each code is:
//!
//! - **typed**: a password-reset code can never log anyone in,
//! - **scoped**: optionally bound to an identifier (e.g. the email address it
//!   was sent to) and/or an identity,
//! - **single-use**: consumption is one conditional write on `used_at IS NULL`,
//! - **rate-limited**: one IP may request only a few codes per window.
//!
//! # Identifier matching
//!
//! | Stored identifier | `identifier` argument | Matches |
//! |-------------------|-----------------------|---------|
//! | `None`            | anything              | yes     |
//! | `Some(x)`         | `Some(x)`             | yes     |
//! | `Some(x)`         | `Some(y)` / `None`    | no      |

use crate::config::{OtpConfig, check_duration};
use crate::environment::{Clock, SystemClock, checked_earlier};
use crate::error::{AuthError, Result};
use crate::events::{SecurityEvent, SecurityEventSink, TracingEventSink};
use crate::identity::{IdentityRef, IdentityResolver};
use crate::models::{OneTimeToken, OneTimeTokenId, OneTimeTokenQuery, OneTimeTokenType};
use crate::providers::OneTimeTokenStore;
use crate::token::{TokenHash, generate_code};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// Parameters of a one-time code request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOneTimeToken {
    /// Purpose.
    pub token_type: OneTimeTokenType,

    /// Expiry.
    pub valid_until: DateTime<Utc>,

    /// Principal the code acts for, if the account exists.
    pub identity: Option<IdentityRef>,

    /// Identifier the code is bound to.
    pub identifier: Option<String>,

    /// Requesting address. Requests without one are not rate-limited.
    pub ip_address: Option<IpAddr>,

    /// Code length. Defaults to [`OtpConfig::default_code_length`].
    pub code_length: Option<usize>,
}

impl IssueOneTimeToken {
    /// Unbound request of `token_type` valid until `valid_until`.
    #[must_use]
    pub const fn new(token_type: OneTimeTokenType, valid_until: DateTime<Utc>) -> Self {
        Self {
            token_type,
            valid_until,
            identity: None,
            identifier: None,
            ip_address: None,
            code_length: None,
        }
    }

    /// Bind the code to a principal.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityRef) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Bind the code to an identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Record the requesting address (enables rate limiting).
    #[must_use]
    pub const fn with_ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    /// Override the code length.
    #[must_use]
    pub const fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = Some(length);
        self
    }
}

/// One-time token engine.
#[derive(Clone)]
pub struct OneTimeTokenService<S, C = SystemClock> {
    store: S,
    clock: C,
    config: OtpConfig,
    events: Arc<dyn SecurityEventSink>,
}

impl<S: OneTimeTokenStore> OneTimeTokenService<S, SystemClock> {
    /// Create a one-time token service logging events to [`TracingEventSink`].
    #[must_use]
    pub fn new(store: S, config: OtpConfig) -> Self {
        Self {
            store,
            clock: SystemClock,
            config,
            events: Arc::new(TracingEventSink),
        }
    }
}

impl<S: OneTimeTokenStore, C: Clock> OneTimeTokenService<S, C> {
    /// Replace the clock.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> OneTimeTokenService<S, C2> {
        OneTimeTokenService {
            store: self.store,
            clock,
            config: self.config,
            events: self.events,
        }
    }

    /// Send security events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: impl SecurityEventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue a code.
    ///
    /// # Returns
    ///
    /// The raw code, to be delivered out-of-band. Only its hash is stored.
    ///
    /// # Errors
    ///
    /// - Requesting IP over its limit → `AuthError::TooManyAttempts` (nothing is written)
    /// - Code length below the configured minimum, or empty alphabet →
    ///   `AuthError::Configuration`
    /// - Store failure → the store's error
    pub async fn issue(&self, request: IssueOneTimeToken) -> Result<String> {
        let length = request
            .code_length
            .unwrap_or(self.config.default_code_length);
        if length < self.config.min_code_length {
            return Err(AuthError::Configuration(format!(
                "one-time code length {length} is below the minimum of {}",
                self.config.min_code_length
            )));
        }

        let now = self.clock.now();

        if let Some(ip) = request.ip_address {
            self.check_rate_limit(request.token_type, ip, now).await?;
        }

        let code = generate_code(length, &self.config.alphabet).ok_or_else(|| {
            AuthError::Configuration("one-time code alphabet is empty".to_string())
        })?;

        let record = OneTimeToken {
            id: OneTimeTokenId::new(),
            token_hash: TokenHash::of(&code),
            token_type: request.token_type,
            identity: request.identity,
            identifier: request.identifier,
            ip_address: request.ip_address,
            created_at: now,
            valid_until: request.valid_until,
            used_at: None,
        };

        self.store.insert(&record).await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to store one-time token");
        })?;

        tracing::info!(
            token_type = %record.token_type,
            token = %record.token_hash.prefix(),
            identifier = ?record.identifier,
            valid_until = %record.valid_until,
            "One-time token issued"
        );
        metrics::counter!("tokenwarden.otp.issued").increment(1);

        self.events.emit(SecurityEvent::OneTimeTokenIssued {
            token_type: record.token_type,
            identity: record.identity,
            identifier: record.identifier,
            ip_address: record.ip_address,
        });

        Ok(code)
    }

    /// Look up a code, optionally consuming it.
    ///
    /// With `mark_used` the match and the `used_at` write are one atomic
    /// store operation; of several concurrent callers exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - No valid unconsumed match → `AuthError::OneTimeTokenNotFound`
    /// - Store failure → the store's error
    pub async fn find(
        &self,
        token_type: OneTimeTokenType,
        raw_code: &str,
        identifier: Option<&str>,
        mark_used: bool,
    ) -> Result<OneTimeToken> {
        let query = OneTimeTokenQuery {
            token_type,
            token_hash: TokenHash::of(raw_code),
            identifier: identifier.map(str::to_string),
        };
        let now = self.clock.now();

        let found = if mark_used {
            self.store.consume(&query, now).await?
        } else {
            self.store.find(&query, now).await?
        };

        let Some(record) = found else {
            tracing::debug!(
                token_type = %token_type,
                token = %query.token_hash.prefix(),
                "One-time token not found"
            );
            metrics::counter!("tokenwarden.otp.not_found").increment(1);
            return Err(AuthError::OneTimeTokenNotFound);
        };

        if mark_used {
            tracing::info!(
                token_type = %record.token_type,
                token = %record.token_hash.prefix(),
                identity = ?record.identity,
                "One-time token consumed"
            );
            metrics::counter!("tokenwarden.otp.consumed").increment(1);

            self.events.emit(SecurityEvent::OneTimeTokenConsumed {
                token_type: record.token_type,
                identity: record.identity.clone(),
                identifier: record.identifier.clone(),
            });
        }

        Ok(record)
    }

    /// Consume a code.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub async fn consume(
        &self,
        token_type: OneTimeTokenType,
        raw_code: &str,
        identifier: Option<&str>,
    ) -> Result<OneTimeToken> {
        self.find(token_type, raw_code, identifier, true).await
    }

    /// Look up a code without consuming it.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub async fn peek(
        &self,
        token_type: OneTimeTokenType,
        raw_code: &str,
        identifier: Option<&str>,
    ) -> Result<OneTimeToken> {
        self.find(token_type, raw_code, identifier, false).await
    }

    /// Resolve the identity a code acts for, without consuming it.
    ///
    /// # Errors
    ///
    /// - No valid match → `AuthError::OneTimeTokenNotFound`
    /// - Code not bound to an identity, or identity gone → `AuthError::IdentityNotFound`
    pub async fn identity_of<R: IdentityResolver>(
        &self,
        resolver: &R,
        token_type: OneTimeTokenType,
        raw_code: &str,
        identifier: Option<&str>,
    ) -> Result<R::Identity> {
        let record = self.peek(token_type, raw_code, identifier).await?;
        let reference = record.identity.ok_or(AuthError::IdentityNotFound)?;
        resolver
            .resolve(&reference)
            .await?
            .ok_or(AuthError::IdentityNotFound)
    }

    async fn check_rate_limit(
        &self,
        token_type: OneTimeTokenType,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let window = check_duration("rate limit window", self.config.rate_limit_window)?;
        let since = checked_earlier(now, window)?;
        let attempts = self
            .store
            .count_issued_since(ip, since, self.config.count_used_tokens)
            .await?;

        if attempts < self.config.max_tokens_per_ip {
            return Ok(());
        }

        tracing::warn!(
            ip = %ip,
            token_type = %token_type,
            attempts,
            limit = self.config.max_tokens_per_ip,
            "One-time token rate limit exceeded"
        );
        metrics::counter!("tokenwarden.otp.rate_limited").increment(1);

        self.events.emit(SecurityEvent::OneTimeTokenRateLimited {
            token_type,
            ip_address: ip,
            attempts,
        });

        Err(AuthError::TooManyAttempts {
            retry_after: window.to_std().unwrap_or_default(),
        })
    }
}
