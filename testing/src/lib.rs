//! # Tokenwarden Testing
//!
//! Testing utilities and helpers for Tokenwarden.
//!
//! This crate provides:
//! - Deterministic clocks
//! - Fixtures for identities and client fingerprints
//! - [`TestHarness`]: engines wired to in-memory stores, a manual clock and a
//!   recording event sink
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use tokenwarden_testing::{TestHarness, helpers};
//!
//! #[tokio::test]
//! async fn test_session_expires() {
//!     let harness = TestHarness::new();
//!     let sessions = harness.sessions();
//!     let (alice, _) = helpers::alice();
//!
//!     let issued = sessions
//!         .issue(alice, helpers::home_fingerprint(), None, Default::default())
//!         .await
//!         .unwrap();
//!
//!     harness.clock.advance(chrono::Duration::days(15));
//!     assert!(sessions.validate(&issued.token, &helpers::home_fingerprint(), None).await.is_err());
//! }
//! ```

use chrono::{DateTime, Utc};
use tokenwarden_auth::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use tokenwarden_auth::mocks::ManualClock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tokenwarden_testing::mocks::FixedClock;
    /// use tokenwarden_auth::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// A [`ManualClock`] starting at the same instant as [`test_clock`].
    #[must_use]
    pub fn manual_clock() -> ManualClock {
        ManualClock::new(epoch())
    }

    #[allow(clippy::expect_used)]
    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Fixtures for identities and client fingerprints.
pub mod helpers {
    use serde::{Deserialize, Serialize};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Once;
    use tokenwarden_auth::{Fingerprint, IdentityRef};

    /// Minimal host-side user record.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TestUser {
        /// Display name
        pub name: String,
        /// Login identifier
        pub email: String,
    }

    /// Password registered for every fixture user.
    pub const PASSWORD: &str = "correct horse battery staple";

    /// Alice, `user#1`.
    #[must_use]
    pub fn alice() -> (IdentityRef, TestUser) {
        user("1", "Alice", "alice@example.com")
    }

    /// Bob, `user#2`.
    #[must_use]
    pub fn bob() -> (IdentityRef, TestUser) {
        user("2", "Bob", "bob@example.com")
    }

    fn user(id: &str, name: &str, email: &str) -> (IdentityRef, TestUser) {
        (
            IdentityRef::new("user", id),
            TestUser {
                name: name.to_string(),
                email: email.to_string(),
            },
        )
    }

    /// Address the fixture users normally connect from.
    pub const HOME_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

    /// An unrelated address.
    pub const FOREIGN_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 99));

    /// Browser on the home network.
    #[must_use]
    pub fn home_fingerprint() -> Fingerprint {
        Fingerprint::new(HOME_IP, "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
    }

    /// Same browser, different network (roaming laptop).
    #[must_use]
    pub fn roaming_fingerprint() -> Fingerprint {
        Fingerprint::new(FOREIGN_IP, "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
    }

    /// Different client on a different network (stolen cookie).
    #[must_use]
    pub fn foreign_fingerprint() -> Fingerprint {
        Fingerprint::new(FOREIGN_IP, "curl/8.5.0")
    }

    /// Install a test tracing subscriber once per process.
    ///
    /// Honours `RUST_LOG`; output goes through the test writer so it is only
    /// shown for failing tests.
    pub fn init_tracing() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "tokenwarden_auth=debug".into()),
                )
                .with_test_writer()
                .try_init();
        });
    }
}

/// Engines wired to in-memory collaborators.
pub mod harness {
    use crate::helpers::{self, TestUser};
    use crate::mocks::manual_clock;
    use tokenwarden_auth::mocks::{
        ManualClock, MockCredentialVerifier, MockIdentityResolver, MockOneTimeTokenStore,
        MockSessionTokenStore, RecordingEventSink,
    };
    use tokenwarden_auth::{
        Authenticator, OneTimeTokenService, Result, SessionManager, TokenwardenConfig,
    };

    /// Session engine over mocks.
    pub type TestSessions = SessionManager<MockSessionTokenStore, ManualClock>;

    /// One-time token engine over mocks.
    pub type TestOneTimeTokens = OneTimeTokenService<MockOneTimeTokenStore, ManualClock>;

    /// Login facade over mocks.
    pub type TestAuthenticator = Authenticator<
        MockSessionTokenStore,
        MockOneTimeTokenStore,
        MockCredentialVerifier,
        MockIdentityResolver<TestUser>,
        ManualClock,
    >;

    /// Shared handles to every in-memory collaborator.
    ///
    /// Engines built from one harness see the same stores, clock and event
    /// log, so a test can act through one engine and inspect through another.
    #[derive(Debug, Clone)]
    pub struct TestHarness {
        /// Clock shared by every engine.
        pub clock: ManualClock,
        /// Session records.
        pub session_store: MockSessionTokenStore,
        /// One-time code records.
        pub otp_store: MockOneTimeTokenStore,
        /// Every emitted security event.
        pub events: RecordingEventSink,
        /// Password directory.
        pub verifier: MockCredentialVerifier,
        /// Identity directory.
        pub resolver: MockIdentityResolver<TestUser>,
        /// Engine configuration.
        pub config: TokenwardenConfig,
    }

    impl TestHarness {
        /// Harness with default configuration.
        #[must_use]
        pub fn new() -> Self {
            Self::with_config(TokenwardenConfig::default())
        }

        /// Harness with `config`.
        #[must_use]
        pub fn with_config(config: TokenwardenConfig) -> Self {
            Self {
                clock: manual_clock(),
                session_store: MockSessionTokenStore::new(),
                otp_store: MockOneTimeTokenStore::new(),
                events: RecordingEventSink::new(),
                verifier: MockCredentialVerifier::new(),
                resolver: MockIdentityResolver::new(),
                config,
            }
        }

        /// Register Alice and Bob with [`helpers::PASSWORD`].
        ///
        /// # Errors
        ///
        /// Returns error if a mock mutex is poisoned.
        pub fn with_fixture_users(self) -> Result<Self> {
            for (reference, user) in [helpers::alice(), helpers::bob()] {
                self.verifier
                    .add_user(user.email.clone(), helpers::PASSWORD, reference.clone())?;
                self.resolver.insert(reference, user)?;
            }
            Ok(self)
        }

        /// Session engine.
        #[must_use]
        pub fn sessions(&self) -> TestSessions {
            SessionManager::new(self.session_store.clone(), self.config.session.clone())
                .with_clock(self.clock.clone())
                .with_event_sink(self.events.clone())
        }

        /// One-time token engine.
        #[must_use]
        pub fn one_time_tokens(&self) -> TestOneTimeTokens {
            OneTimeTokenService::new(self.otp_store.clone(), self.config.otp.clone())
                .with_clock(self.clock.clone())
                .with_event_sink(self.events.clone())
        }

        /// Login facade.
        #[must_use]
        pub fn authenticator(&self) -> TestAuthenticator {
            Authenticator::new(
                self.sessions(),
                self.one_time_tokens(),
                self.verifier.clone(),
                self.resolver.clone(),
            )
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use tokenwarden_auth::{Fingerprint, IdentityRef, Metadata};

    /// Any IPv4 or IPv6 address.
    pub fn ip_address() -> impl Strategy<Value = IpAddr> {
        prop_oneof![
            any::<[u8; 4]>().prop_map(|o| IpAddr::V4(Ipv4Addr::from(o))),
            any::<[u16; 8]>().prop_map(|s| IpAddr::V6(Ipv6Addr::from(s))),
        ]
    }

    /// Fingerprints with and without a user agent.
    pub fn fingerprint() -> impl Strategy<Value = Fingerprint> {
        (ip_address(), proptest::option::of("[a-zA-Z0-9/. ()]{1,40}")).prop_map(|(ip, ua)| {
            match ua {
                Some(ua) => Fingerprint::new(ip, ua),
                None => Fingerprint::without_user_agent(ip),
            }
        })
    }

    /// Identity references in a small set of classes.
    pub fn identity_ref() -> impl Strategy<Value = IdentityRef> {
        (prop_oneof!["user", "admin", "service"], "[0-9]{1,6}")
            .prop_map(|(class, id)| IdentityRef::new(class, id))
    }

    /// Flat metadata maps with string, number and boolean values.
    pub fn metadata() -> impl Strategy<Value = Metadata> {
        proptest::collection::btree_map(
            "[a-z]{1,8}",
            prop_oneof![
                "[a-z0-9]{0,8}".prop_map(serde_json::Value::from),
                any::<i32>().prop_map(serde_json::Value::from),
                any::<bool>().prop_map(serde_json::Value::from),
            ],
            0..5,
        )
    }
}

// Re-export commonly used items
pub use harness::TestHarness;
pub use mocks::{FixedClock, ManualClock, manual_clock, test_clock};
