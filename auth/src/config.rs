//! Token engine configuration.
//!
//! All values have production defaults and can be overridden either with the
//! `with_*` builders or by deserializing from the host's configuration file.
//! Durations are written as whole seconds in serialized form and must lie in
//! `1..=`[`MAX_DURATION_SECS`].

use crate::error::{AuthError, Result};
use crate::fraud::FraudPolicyKind;
use crate::token::{DEFAULT_CODE_ALPHABET, MIN_TOKEN_LENGTH};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Longest lifetime, window or retention accepted anywhere (ten years).
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Check that `duration` is positive and at most [`MAX_DURATION_SECS`].
///
/// # Errors
///
/// Returns `AuthError::Configuration` naming `what` otherwise.
pub fn check_duration(what: &str, duration: Duration) -> Result<Duration> {
    if duration <= Duration::zero() || duration.num_seconds() > MAX_DURATION_SECS {
        return Err(AuthError::Configuration(format!(
            "{what} must be between 1s and {MAX_DURATION_SECS}s, got {}s",
            duration.num_seconds()
        )));
    }
    Ok(duration)
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Validity granted at issuance and on every successful validation.
    ///
    /// Default: 14 days
    #[serde(with = "seconds")]
    pub ttl: Duration,

    /// Replace the token on every successful validation.
    ///
    /// Default: false
    pub rotate_tokens: bool,

    /// Fraud policy applied on validation.
    ///
    /// Default: [`FraudPolicyKind::Conjunctive`]
    pub fraud_policy: FraudPolicyKind,

    /// Hash collisions tolerated before issuance gives up.
    ///
    /// Default: 5
    pub max_issue_attempts: u32,
}

impl SessionConfig {
    /// Create configuration with the given TTL and defaults for everything else.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            rotate_tokens: false,
            fraud_policy: FraudPolicyKind::Conjunctive,
            max_issue_attempts: 5,
        }
    }

    /// Set session TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable or disable token rotation.
    #[must_use]
    pub const fn with_rotation(mut self, rotate_tokens: bool) -> Self {
        self.rotate_tokens = rotate_tokens;
        self
    }

    /// Set fraud policy.
    #[must_use]
    pub const fn with_fraud_policy(mut self, fraud_policy: FraudPolicyKind) -> Self {
        self.fraud_policy = fraud_policy;
        self
    }

    /// Set the issuance retry bound.
    #[must_use]
    pub const fn with_max_issue_attempts(mut self, attempts: u32) -> Self {
        self.max_issue_attempts = attempts;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Duration::days(14))
    }
}

/// One-time token configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Codes one IP may request within [`rate_limit_window`](Self::rate_limit_window).
    ///
    /// Default: 5
    pub max_tokens_per_ip: u64,

    /// Trailing window for the per-IP limit.
    ///
    /// Default: 15 minutes
    #[serde(with = "seconds")]
    pub rate_limit_window: Duration,

    /// Whether already consumed codes count toward the limit.
    ///
    /// When `true` a user who completed five flows is throttled like one who
    /// requested five codes and used none.
    ///
    /// Default: true
    pub count_used_tokens: bool,

    /// Code length when the caller does not specify one.
    ///
    /// Default: 32
    pub default_code_length: usize,

    /// Shortest code the engine will generate.
    ///
    /// Default: 6
    pub min_code_length: usize,

    /// Characters codes are drawn from.
    ///
    /// Default: [`DEFAULT_CODE_ALPHABET`]
    pub alphabet: String,
}

impl OtpConfig {
    /// Create configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_tokens_per_ip: 5,
            rate_limit_window: Duration::minutes(15),
            count_used_tokens: true,
            default_code_length: 32,
            min_code_length: 6,
            alphabet: DEFAULT_CODE_ALPHABET.to_string(),
        }
    }

    /// Set the per-IP limit.
    #[must_use]
    pub const fn with_max_tokens_per_ip(mut self, max: u64) -> Self {
        self.max_tokens_per_ip = max;
        self
    }

    /// Set the rate limit window.
    #[must_use]
    pub const fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Choose whether consumed codes count toward the limit.
    #[must_use]
    pub const fn with_count_used_tokens(mut self, count_used_tokens: bool) -> Self {
        self.count_used_tokens = count_used_tokens;
        self
    }

    /// Set the default code length.
    #[must_use]
    pub const fn with_default_code_length(mut self, length: usize) -> Self {
        self.default_code_length = length;
        self
    }

    /// Set the code alphabet.
    #[must_use]
    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSitePolicy {
    /// `SameSite=Strict`.
    Strict,

    /// `SameSite=Lax`.
    #[default]
    Lax,

    /// `SameSite=None` (requires `Secure`).
    None,
}

/// Session cookie settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name.
    ///
    /// Default: `"userid"`
    pub name: String,

    /// `Domain` attribute. `None` scopes the cookie to the issuing host.
    pub domain: Option<String>,

    /// `Path` attribute.
    ///
    /// Default: `"/"`
    pub path: String,

    /// `SameSite` attribute.
    ///
    /// Default: Lax
    pub same_site: SameSitePolicy,

    /// `Secure` attribute.
    ///
    /// Default: true
    pub secure: bool,

    /// Cookie values shorter than this are never looked up.
    ///
    /// Default: 13
    pub min_token_length: usize,
}

impl CookieConfig {
    /// Create configuration with the given cookie name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: None,
            path: "/".to_string(),
            same_site: SameSitePolicy::Lax,
            secure: true,
            min_token_length: MIN_TOKEN_LENGTH,
        }
    }

    /// Set cookie domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set cookie path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set `SameSite` policy.
    #[must_use]
    pub const fn with_same_site(mut self, same_site: SameSitePolicy) -> Self {
        self.same_site = same_site;
        self
    }

    /// Set `Secure` flag. Only disable for plain-HTTP development servers.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Returns `true` if `value` is long enough to be a candidate token.
    #[must_use]
    pub fn accepts(&self, value: &str) -> bool {
        value.len() >= self.min_token_length
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self::new("userid")
    }
}

/// Complete configuration for a host application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenwardenConfig {
    /// Session lifecycle.
    pub session: SessionConfig,

    /// One-time tokens.
    pub otp: OtpConfig,

    /// Session cookie.
    pub cookie: CookieConfig,
}

mod seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        if !(1..=super::MAX_DURATION_SECS).contains(&secs) {
            return Err(serde::de::Error::custom(format!(
                "duration out of range: {secs}s (allowed 1..={}s)",
                super::MAX_DURATION_SECS
            )));
        }
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {secs}s")))
    }
}
