//! Request fingerprints and fraud policies.
//!
//! A [`Fingerprint`] is the (IP, user agent) pair captured when a session
//! token is issued or refreshed. On every validation the recorded fingerprint
//! is compared with the one of the current request by a [`FraudPolicy`].
//!
//! The trade-off between false positives (mobile users roaming between
//! networks) and missed theft is a product decision, so the policy is a
//! pluggable predicate:
//!
//! | Policy                | Flags fraud when                          |
//! |-----------------------|-------------------------------------------|
//! | [`UserAgentMismatch`] | the user agent differs                    |
//! | [`FullMismatch`]      | both the IP and the user agent differ     |
//! | [`Disabled`]          | never                                     |
//! | any closure           | the closure returns `true`                |

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Client fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Client IP address.
    pub ip: IpAddr,

    /// `User-Agent` header, if the client sent one.
    pub user_agent: Option<String>,
}

impl Fingerprint {
    /// Create a new fingerprint.
    #[must_use]
    pub fn new(ip: IpAddr, user_agent: impl Into<String>) -> Self {
        Self {
            ip,
            user_agent: Some(user_agent.into()),
        }
    }

    /// Fingerprint of a client that sent no `User-Agent`.
    #[must_use]
    pub const fn without_user_agent(ip: IpAddr) -> Self {
        Self {
            ip,
            user_agent: None,
        }
    }

    fn same_ip(&self, other: &Self) -> bool {
        self.ip == other.ip
    }

    fn same_user_agent(&self, other: &Self) -> bool {
        self.user_agent == other.user_agent
    }
}

/// Decides whether a presented fingerprint indicates a stolen token.
pub trait FraudPolicy: Send + Sync {
    /// Returns `true` if `presented` must be treated as token theft.
    fn is_fraudulent(&self, recorded: &Fingerprint, presented: &Fingerprint) -> bool;
}

impl<F> FraudPolicy for F
where
    F: Fn(&Fingerprint, &Fingerprint) -> bool + Send + Sync,
{
    fn is_fraudulent(&self, recorded: &Fingerprint, presented: &Fingerprint) -> bool {
        self(recorded, presented)
    }
}

/// Strict policy: a different user agent is fraud, the IP is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentMismatch;

impl FraudPolicy for UserAgentMismatch {
    fn is_fraudulent(&self, recorded: &Fingerprint, presented: &Fingerprint) -> bool {
        !recorded.same_user_agent(presented)
    }
}

/// Conjunctive policy: fraud only if both the IP and the user agent changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullMismatch;

impl FraudPolicy for FullMismatch {
    fn is_fraudulent(&self, recorded: &Fingerprint, presented: &Fingerprint) -> bool {
        !recorded.same_ip(presented) && !recorded.same_user_agent(presented)
    }
}

/// No fraud detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl FraudPolicy for Disabled {
    fn is_fraudulent(&self, _recorded: &Fingerprint, _presented: &Fingerprint) -> bool {
        false
    }
}

/// Built-in policy selector used by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudPolicyKind {
    /// [`UserAgentMismatch`].
    Strict,

    /// [`FullMismatch`].
    #[default]
    Conjunctive,

    /// [`Disabled`].
    Disabled,
}

impl FraudPolicyKind {
    /// Build the selected policy.
    #[must_use]
    pub fn build(self) -> Arc<dyn FraudPolicy> {
        match self {
            Self::Strict => Arc::new(UserAgentMismatch),
            Self::Conjunctive => Arc::new(FullMismatch),
            Self::Disabled => Arc::new(Disabled),
        }
    }
}
