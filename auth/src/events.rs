//! Security events.
//!
//! The engines report every lifecycle transition an operator may want to
//! alert on. Events carry token hashes, identity references and
//! fingerprints; raw tokens and codes never leave the engine that generated
//! them.
//!
//! # Example
//!
//! ```
//! use tokenwarden_auth::events::{SecurityEvent, SecurityEventSink};
//!
//! struct Alerting;
//!
//! impl SecurityEventSink for Alerting {
//!     fn emit(&self, event: SecurityEvent) {
//!         if event.is_alert() {
//!             // page someone
//!         }
//!     }
//! }
//! ```

use crate::fraud::Fingerprint;
use crate::identity::IdentityRef;
use crate::models::{OneTimeTokenType, SessionTokenId};
use crate::token::TokenHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Observable security-relevant transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    // ═══════════════════════════════════════════════════════════════════════
    // Session Events
    // ═══════════════════════════════════════════════════════════════════════
    /// A session token was issued.
    SessionIssued {
        /// Record identifier
        session_id: SessionTokenId,
        /// Principal
        identity: IdentityRef,
        /// Issuing context
        context: Option<String>,
        /// Client fingerprint
        fingerprint: Fingerprint,
        /// Expiry
        valid_until: DateTime<Utc>,
    },

    /// An unknown, expired, out-of-context or malformed token was presented.
    ///
    /// Either stale client state or somebody probing for valid tokens.
    InvalidToken {
        /// Hash of the presented value
        token_hash: TokenHash,
        /// Client fingerprint
        fingerprint: Fingerprint,
    },

    /// A valid token was presented from a fingerprint the fraud policy rejects.
    ///
    /// The session has already been invalidated when this is emitted.
    FraudDetected {
        /// Record identifier
        session_id: SessionTokenId,
        /// Principal whose session was hijacked
        identity: IdentityRef,
        /// Fingerprint recorded at issuance / last refresh
        recorded: Fingerprint,
        /// Fingerprint of the offending request
        presented: Fingerprint,
    },

    /// One or more sessions were invalidated on request.
    SessionInvalidated {
        /// Principal
        identity: IdentityRef,
        /// Number of records invalidated
        count: usize,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // One-Time Token Events
    // ═══════════════════════════════════════════════════════════════════════
    /// A one-time code was issued.
    OneTimeTokenIssued {
        /// Purpose
        token_type: OneTimeTokenType,
        /// Bound principal
        identity: Option<IdentityRef>,
        /// Bound identifier
        identifier: Option<String>,
        /// Requesting address
        ip_address: Option<IpAddr>,
    },

    /// A code request was refused by the per-IP limit.
    OneTimeTokenRateLimited {
        /// Purpose
        token_type: OneTimeTokenType,
        /// Requesting address
        ip_address: IpAddr,
        /// Codes counted in the window
        attempts: u64,
    },

    /// A one-time code was consumed.
    OneTimeTokenConsumed {
        /// Purpose
        token_type: OneTimeTokenType,
        /// Bound principal
        identity: Option<IdentityRef>,
        /// Bound identifier
        identifier: Option<String>,
    },
}

impl SecurityEvent {
    /// Short stable name, used as a log field.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SessionIssued { .. } => "session_issued",
            Self::InvalidToken { .. } => "invalid_token",
            Self::FraudDetected { .. } => "fraud_detected",
            Self::SessionInvalidated { .. } => "session_invalidated",
            Self::OneTimeTokenIssued { .. } => "one_time_token_issued",
            Self::OneTimeTokenRateLimited { .. } => "one_time_token_rate_limited",
            Self::OneTimeTokenConsumed { .. } => "one_time_token_consumed",
        }
    }

    /// Returns `true` for events an operator should be alerted about.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. } | Self::FraudDetected { .. } | Self::OneTimeTokenRateLimited { .. }
        )
    }
}

/// Receiver of security events.
///
/// Called inline on the request path, so implementations should hand
/// expensive work (paging, webhooks) off to a queue.
pub trait SecurityEventSink: Send + Sync {
    /// Receive one event.
    fn emit(&self, event: SecurityEvent);
}

impl<S: SecurityEventSink + ?Sized> SecurityEventSink for Arc<S> {
    fn emit(&self, event: SecurityEvent) {
        (**self).emit(event);
    }
}

/// Sink that forwards events to `tracing`.
///
/// Alerts are logged at `warn`, everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn emit(&self, event: SecurityEvent) {
        let name = event.name();
        let payload = serde_json::to_string(&event).unwrap_or_default();

        if event.is_alert() {
            tracing::warn!(event = name, payload = %payload, "Security event");
        } else {
            tracing::info!(event = name, payload = %payload, "Security event");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SecurityEvent::OneTimeTokenRateLimited {
            token_type: OneTimeTokenType::Login,
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            attempts: 5,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "one_time_token_rate_limited");
        assert_eq!(json["token_type"], "login");
        assert_eq!(json["attempts"], 5);
    }

    #[test]
    fn test_invalid_token_event_carries_hash_only() {
        let event = SecurityEvent::InvalidToken {
            token_hash: TokenHash::of("raw-secret-token"),
            fingerprint: Fingerprint::without_user_agent(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("raw-secret-token"));
        assert!(json.contains(TokenHash::of("raw-secret-token").as_str()));
        assert!(event.is_alert());
    }
}
