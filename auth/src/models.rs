//! Persisted token records.
//!
//! Both record kinds are owned by their engine: [`SessionToken`] by
//! [`SessionManager`](crate::session::SessionManager), [`OneTimeToken`] by
//! [`OneTimeTokenService`](crate::otp::OneTimeTokenService). Stores persist
//! and query them but never decide lifecycle transitions on their own.

use crate::fraud::Fingerprint;
use crate::identity::IdentityRef;
use crate::token::TokenHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Application-defined session metadata.
///
/// Only ever compared for subset equality (bulk invalidation filters).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Returns `true` if every entry of `filter` is present in `metadata` with an
/// equal value.
#[must_use]
pub fn metadata_contains(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}

/// Session token record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTokenId(pub Uuid);

impl SessionTokenId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionTokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One live client session.
///
/// # Lifecycle
///
/// ```text
/// Active (valid_until > now) ──validate──▶ Refreshed ──▶ Active
///        │                                    (valid_until extended,
///        │                                     optionally rotated)
///        ├──invalidate / fraud──▶ Invalidated (valid_until = now)
///        └──time passes────────▶ Expired     (valid_until <= now)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Record identifier.
    pub id: SessionTokenId,

    /// Authenticated principal.
    pub identity: IdentityRef,

    /// Hash of the token held by the client.
    pub token_hash: TokenHash,

    /// Scope the token was issued for (tenant, application area, ...).
    pub context: Option<String>,

    /// Application metadata carried across the session.
    pub metadata: Metadata,

    /// Fingerprint at issuance or last refresh.
    pub fingerprint: Fingerprint,

    /// Issuance time.
    pub created_at: DateTime<Utc>,

    /// End of validity. Set to "now" to invalidate.
    pub valid_until: DateTime<Utc>,

    /// Last token rotation.
    pub regenerated_at: Option<DateTime<Utc>>,

    /// Fingerprint presented when fraud was detected.
    pub fraud_data: Option<Fingerprint>,

    /// Optimistic concurrency counter, bumped on every write.
    pub version: u64,
}

impl SessionToken {
    /// Returns `true` while the record can still authenticate requests.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

/// One-time token purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeTokenType {
    /// Passwordless login code or magic link.
    Login,

    /// Email / phone verification.
    Verification,

    /// Password reset.
    PasswordRecovery,

    /// Account creation confirmation.
    AccountCreation,
}

impl OneTimeTokenType {
    /// Stable string form used by the stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Verification => "verification",
            Self::PasswordRecovery => "password_recovery",
            Self::AccountCreation => "account_creation",
        }
    }
}

impl fmt::Display for OneTimeTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OneTimeTokenType {
    type Err = crate::error::AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Self::Login),
            "verification" => Ok(Self::Verification),
            "password_recovery" => Ok(Self::PasswordRecovery),
            "account_creation" => Ok(Self::AccountCreation),
            other => Err(crate::error::AuthError::SerializationError(format!(
                "unknown one-time token type: {other}"
            ))),
        }
    }
}

/// One-time token record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OneTimeTokenId(pub Uuid);

impl OneTimeTokenId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OneTimeTokenId {
    fn default() -> Self {
        Self::new()
    }
}

/// One issued one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeToken {
    /// Record identifier.
    pub id: OneTimeTokenId,

    /// Hash of the code delivered out-of-band.
    pub token_hash: TokenHash,

    /// Purpose of the code.
    pub token_type: OneTimeTokenType,

    /// Principal the code is bound to, if an account already exists.
    pub identity: Option<IdentityRef>,

    /// Free-form scope (e.g. the email address the code was sent to).
    pub identifier: Option<String>,

    /// Address that requested the code.
    pub ip_address: Option<IpAddr>,

    /// Issuance time.
    pub created_at: DateTime<Utc>,

    /// End of validity.
    pub valid_until: DateTime<Utc>,

    /// Consumption time. `None` means unconsumed.
    pub used_at: Option<DateTime<Utc>>,
}

impl OneTimeToken {
    /// Returns `true` if the code can still be consumed.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.valid_until
    }
}

/// Lookup criteria for a one-time token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeTokenQuery {
    /// Required type.
    pub token_type: OneTimeTokenType,

    /// Hash of the presented code.
    pub token_hash: TokenHash,

    /// Identifier supplied by the caller.
    ///
    /// `Some(x)` matches records bound to `x` or unbound records; `None`
    /// matches unbound records only.
    pub identifier: Option<String>,
}

impl OneTimeTokenQuery {
    /// Returns `true` if `record` satisfies this query and is still valid at `now`.
    #[must_use]
    pub fn matches(&self, record: &OneTimeToken, now: DateTime<Utc>) -> bool {
        let identifier_matches = match (&self.identifier, &record.identifier) {
            (_, None) => true,
            (Some(wanted), Some(stored)) => wanted == stored,
            (None, Some(_)) => false,
        };

        record.token_type == self.token_type
            && record.token_hash == self.token_hash
            && identifier_matches
            && record.is_valid(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::net::Ipv4Addr;

    fn record(identifier: Option<&str>) -> OneTimeToken {
        let now = Utc::now();
        OneTimeToken {
            id: OneTimeTokenId::new(),
            token_hash: TokenHash::of("CODE"),
            token_type: OneTimeTokenType::Login,
            identity: None,
            identifier: identifier.map(str::to_string),
            ip_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            created_at: now,
            valid_until: now + Duration::minutes(10),
            used_at: None,
        }
    }

    fn query(identifier: Option<&str>) -> OneTimeTokenQuery {
        OneTimeTokenQuery {
            token_type: OneTimeTokenType::Login,
            token_hash: TokenHash::of("CODE"),
            identifier: identifier.map(str::to_string),
        }
    }

    #[test]
    fn test_identifier_match_rule() {
        let now = Utc::now();
        let bound = record(Some("alice@example.com"));
        let unbound = record(None);

        assert!(query(Some("alice@example.com")).matches(&bound, now));
        assert!(!query(Some("bob@example.com")).matches(&bound, now));
        assert!(!query(None).matches(&bound, now));

        assert!(query(Some("bob@example.com")).matches(&unbound, now));
        assert!(query(None).matches(&unbound, now));
    }

    #[test]
    fn test_used_or_expired_never_matches() {
        let now = Utc::now();
        let mut used = record(None);
        used.used_at = Some(now);
        assert!(!query(None).matches(&used, now));

        let expired = record(None);
        assert!(!query(None).matches(&expired, expired.valid_until));
    }

    #[test]
    fn test_type_must_match() {
        let now = Utc::now();
        let mut q = query(None);
        q.token_type = OneTimeTokenType::PasswordRecovery;
        assert!(!q.matches(&record(None), now));
    }

    #[test]
    fn test_token_type_round_trip_strings() {
        for token_type in [
            OneTimeTokenType::Login,
            OneTimeTokenType::Verification,
            OneTimeTokenType::PasswordRecovery,
            OneTimeTokenType::AccountCreation,
        ] {
            assert_eq!(token_type.as_str().parse::<OneTimeTokenType>(), Ok(token_type));
        }
        assert!("sso".parse::<OneTimeTokenType>().is_err());
    }

    #[test]
    fn test_metadata_subset() {
        let mut metadata = Metadata::new();
        metadata.insert("tenant".into(), serde_json::json!("acme"));
        metadata.insert("device".into(), serde_json::json!("ios"));

        let mut filter = Metadata::new();
        assert!(metadata_contains(&metadata, &filter));

        filter.insert("tenant".into(), serde_json::json!("acme"));
        assert!(metadata_contains(&metadata, &filter));

        filter.insert("device".into(), serde_json::json!("android"));
        assert!(!metadata_contains(&metadata, &filter));
    }
}
