//! Session token lifecycle.
//!
//! [`SessionManager`] is the only component that creates or mutates
//! [`SessionToken`] records. It hands raw tokens to the caller exactly once
//! (at issuance or rotation) and from then on only ever matches by hash.
//!
//! # Validation outcomes
//!
//! ```text
//! validate(raw, fingerprint, context)
//!   │
//!   ├─ no active record / wrong context ──▶ Err(InvalidToken)   + InvalidToken event
//!   ├─ fraud policy flags fingerprint ────▶ Err(FraudDetected)  + record invalidated
//!   │                                                            + FraudDetected event
//!   └─ accepted ──▶ fingerprint refreshed, valid_until extended,
//!                   token rotated when configured ──▶ Ok(ValidatedSession)
//! ```
//!
//! # Concurrency
//!
//! Every write is a compare-and-swap on (id, hash, version). When two
//! requests rotate the same token, the loser is issued a brand-new session
//! instead of failing. When two requests merely extend it, the loser gets
//! [`AuthError::Conflict`] and the client keeps its token.

use crate::config::{SessionConfig, check_duration};
use crate::environment::{Clock, SystemClock, checked_later};
use crate::error::{AuthError, Result};
use crate::events::{SecurityEvent, SecurityEventSink, TracingEventSink};
use crate::fraud::{Fingerprint, FraudPolicy};
use crate::identity::IdentityRef;
use crate::models::{Metadata, SessionToken, SessionTokenId};
use crate::providers::SessionTokenStore;
use crate::token::{MIN_TOKEN_LENGTH, TokenHash, generate_session_token};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// A freshly issued session.
#[derive(Clone)]
pub struct IssuedSession {
    /// Raw token to hand to the client. Not stored anywhere server-side.
    pub token: String,

    /// Stored record.
    pub record: SessionToken,
}

impl fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSession")
            .field("token", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Result of a successful validation.
#[derive(Clone)]
pub struct ValidatedSession {
    /// Record after refresh.
    pub record: SessionToken,

    /// Replacement token the client must store, when the token was rotated
    /// (or re-issued after losing a rotation race).
    pub rotated_token: Option<String>,
}

impl ValidatedSession {
    /// Authenticated principal.
    #[must_use]
    pub const fn identity(&self) -> &IdentityRef {
        &self.record.identity
    }

    /// New expiry of the session.
    #[must_use]
    pub const fn valid_until(&self) -> DateTime<Utc> {
        self.record.valid_until
    }
}

impl fmt::Debug for ValidatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedSession")
            .field("record", &self.record)
            .field("rotated", &self.rotated_token.is_some())
            .finish()
    }
}

/// Session lifecycle engine.
///
/// Cheap to clone when the store is; share it behind an `Arc` otherwise.
#[derive(Clone)]
pub struct SessionManager<S, C = SystemClock> {
    store: S,
    clock: C,
    config: SessionConfig,
    fraud_policy: Arc<dyn FraudPolicy>,
    events: Arc<dyn SecurityEventSink>,
}

impl<S: SessionTokenStore> SessionManager<S, SystemClock> {
    /// Create a session manager.
    ///
    /// The fraud policy is built from `config.fraud_policy`; events go to
    /// [`TracingEventSink`].
    #[must_use]
    pub fn new(store: S, config: SessionConfig) -> Self {
        let fraud_policy = config.fraud_policy.build();
        Self {
            store,
            clock: SystemClock,
            config,
            fraud_policy,
            events: Arc::new(TracingEventSink),
        }
    }
}

impl<S: SessionTokenStore, C: Clock> SessionManager<S, C> {
    /// Replace the clock.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> SessionManager<S, C2> {
        SessionManager {
            store: self.store,
            clock,
            config: self.config,
            fraud_policy: self.fraud_policy,
            events: self.events,
        }
    }

    /// Replace the fraud policy chosen by the configuration.
    #[must_use]
    pub fn with_fraud_policy(mut self, policy: impl FraudPolicy + 'static) -> Self {
        self.fraud_policy = Arc::new(policy);
        self
    }

    /// Send security events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: impl SecurityEventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Time left on `record`, rounded up to whole seconds; zero once expired.
    ///
    /// This is the lifetime a client-side copy of the token should get.
    #[must_use]
    pub fn remaining_validity(&self, record: &SessionToken) -> Duration {
        let left = record.valid_until.signed_duration_since(self.clock.now());
        if left <= Duration::zero() {
            return Duration::zero();
        }
        let whole = Duration::seconds(left.num_seconds());
        if left > whole {
            whole + Duration::seconds(1)
        } else {
            whole
        }
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Issuance
    // ═══════════════════════════════════════════════════════════════════════

    /// Issue a session with the configured TTL.
    ///
    /// # Errors
    ///
    /// See [`issue_with_ttl`](Self::issue_with_ttl).
    pub async fn issue(
        &self,
        identity: IdentityRef,
        fingerprint: Fingerprint,
        context: Option<String>,
        metadata: Metadata,
    ) -> Result<IssuedSession> {
        self.issue_with_ttl(identity, fingerprint, context, metadata, self.config.ttl)
            .await
    }

    /// Issue a session valid for `ttl`.
    ///
    /// Hash collisions are retried with a fresh token up to
    /// `max_issue_attempts` times; one transient store conflict is retried.
    ///
    /// # Errors
    ///
    /// - `ttl` not positive or longer than
    ///   [`MAX_DURATION_SECS`](crate::config::MAX_DURATION_SECS) → `AuthError::Configuration`
    /// - Repeated hash collisions → `AuthError::Configuration`
    /// - Store failure → the store's error
    pub async fn issue_with_ttl(
        &self,
        identity: IdentityRef,
        fingerprint: Fingerprint,
        context: Option<String>,
        metadata: Metadata,
        ttl: Duration,
    ) -> Result<IssuedSession> {
        let now = self.clock.now();
        let valid_until = checked_later(now, check_duration("session ttl", ttl)?)?;
        let mut collisions = 0;
        let mut conflict_retried = false;

        loop {
            let token = generate_session_token();
            let record = SessionToken {
                id: SessionTokenId::new(),
                identity: identity.clone(),
                token_hash: TokenHash::of(&token),
                context: context.clone(),
                metadata: metadata.clone(),
                fingerprint: fingerprint.clone(),
                created_at: now,
                valid_until,
                regenerated_at: None,
                fraud_data: None,
                version: 0,
            };

            match self.store.insert(&record).await {
                Ok(()) => {
                    tracing::info!(
                        session_id = %record.id,
                        identity = %record.identity,
                        token = %record.token_hash.prefix(),
                        valid_until = %record.valid_until,
                        "Session issued"
                    );
                    metrics::counter!("tokenwarden.session.issued").increment(1);

                    self.events.emit(SecurityEvent::SessionIssued {
                        session_id: record.id,
                        identity: record.identity.clone(),
                        context: record.context.clone(),
                        fingerprint: record.fingerprint.clone(),
                        valid_until: record.valid_until,
                    });

                    return Ok(IssuedSession { token, record });
                }
                Err(AuthError::TokenCollision) => {
                    collisions += 1;
                    tracing::warn!(attempt = collisions, "Session token hash collision");
                    if collisions >= self.config.max_issue_attempts {
                        tracing::error!(
                            attempts = collisions,
                            "Giving up on session issuance after repeated hash collisions"
                        );
                        return Err(AuthError::Configuration(format!(
                            "{collisions} consecutive session token collisions; check the entropy source"
                        )));
                    }
                }
                Err(AuthError::Conflict) if !conflict_retried => {
                    conflict_retried = true;
                    tracing::debug!("Store conflict during session issuance, retrying once");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to store session token");
                    return Err(e);
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate a presented token.
    ///
    /// On success the record's fingerprint and expiry are refreshed and, with
    /// rotation enabled, the token is replaced.
    ///
    /// # Errors
    ///
    /// - Unknown, expired, malformed or out-of-context token → `AuthError::InvalidToken`
    /// - Fingerprint rejected by the fraud policy → `AuthError::FraudDetected`
    ///   (the record is invalidated first)
    /// - Concurrent extension of the same record → `AuthError::Conflict`
    /// - Store failure → the store's error
    pub async fn validate(
        &self,
        raw_token: &str,
        fingerprint: &Fingerprint,
        context: Option<&str>,
    ) -> Result<ValidatedSession> {
        let token_hash = TokenHash::of(raw_token);

        if raw_token.len() < MIN_TOKEN_LENGTH {
            return Err(self.reject(token_hash, fingerprint, "malformed"));
        }

        let now = self.clock.now();
        let Some(record) = self.store.find_active(&token_hash, now).await? else {
            return Err(self.reject(token_hash, fingerprint, "not found or expired"));
        };

        if record.context.as_deref() != context {
            return Err(self.reject(token_hash, fingerprint, "context mismatch"));
        }

        if self
            .fraud_policy
            .is_fraudulent(&record.fingerprint, fingerprint)
        {
            return Err(self.flag_fraud(record, fingerprint, now).await);
        }

        self.refresh(record, fingerprint, now).await
    }

    /// Identity behind a still-active token, without refreshing it.
    ///
    /// # Errors
    ///
    /// Returns error if the store lookup fails.
    pub async fn find_identity(&self, raw_token: &str) -> Result<Option<IdentityRef>> {
        if raw_token.len() < MIN_TOKEN_LENGTH {
            return Ok(None);
        }

        let record = self
            .store
            .find_active(&TokenHash::of(raw_token), self.clock.now())
            .await?;
        Ok(record.map(|record| record.identity))
    }

    /// Active sessions of `identity`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store lookup fails.
    pub async fn active_sessions(&self, identity: &IdentityRef) -> Result<Vec<SessionToken>> {
        self.store
            .find_active_by_identity(identity, &Metadata::new(), self.clock.now())
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invalidation
    // ═══════════════════════════════════════════════════════════════════════

    /// Sign out the client holding `raw_token`.
    ///
    /// No-op if the token is unknown or already inactive.
    ///
    /// # Returns
    ///
    /// `true` if a record was invalidated.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn invalidate_token(&self, raw_token: &str) -> Result<bool> {
        let now = self.clock.now();
        let Some(record) = self
            .store
            .find_active(&TokenHash::of(raw_token), now)
            .await?
        else {
            return Ok(false);
        };

        let identity = record.identity.clone();
        let invalidated = self.invalidate_record(record, now, None).await?;
        if invalidated {
            self.report_invalidation(&identity, 1);
        }
        Ok(invalidated)
    }

    /// Invalidate one session by record identifier.
    ///
    /// No-op if the record is missing or already inactive.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn invalidate_session(&self, id: SessionTokenId) -> Result<bool> {
        let now = self.clock.now();
        let Some(record) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        if !record.is_active(now) {
            return Ok(false);
        }

        let identity = record.identity.clone();
        let invalidated = self.invalidate_record(record, now, None).await?;
        if invalidated {
            self.report_invalidation(&identity, 1);
        }
        Ok(invalidated)
    }

    /// Sign out every active session of `identity` whose metadata contains
    /// `metadata_filter`. An empty filter signs out every session.
    ///
    /// # Returns
    ///
    /// Number of records invalidated.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn invalidate_identity(
        &self,
        identity: &IdentityRef,
        metadata_filter: &Metadata,
    ) -> Result<usize> {
        let now = self.clock.now();
        let records = self
            .store
            .find_active_by_identity(identity, metadata_filter, now)
            .await?;

        let mut count = 0;
        for record in records {
            if self.invalidate_record(record, now, None).await? {
                count += 1;
            }
        }

        self.report_invalidation(identity, count);
        Ok(count)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    fn reject(&self, token_hash: TokenHash, fingerprint: &Fingerprint, reason: &str) -> AuthError {
        tracing::warn!(
            token = %token_hash.prefix(),
            ip = %fingerprint.ip,
            reason,
            "Invalid session token presented"
        );
        metrics::counter!("tokenwarden.session.invalid").increment(1);

        self.events.emit(SecurityEvent::InvalidToken {
            token_hash,
            fingerprint: fingerprint.clone(),
        });
        AuthError::InvalidToken
    }

    async fn flag_fraud(
        &self,
        record: SessionToken,
        presented: &Fingerprint,
        now: DateTime<Utc>,
    ) -> AuthError {
        let session_id = record.id;
        let identity = record.identity.clone();
        let recorded = record.fingerprint.clone();

        tracing::warn!(
            session_id = %session_id,
            identity = %identity,
            recorded_ip = %recorded.ip,
            presented_ip = %presented.ip,
            "Session token fraud detected"
        );
        metrics::counter!("tokenwarden.session.fraud").increment(1);

        if let Err(e) = self
            .invalidate_record(record, now, Some(presented.clone()))
            .await
        {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to invalidate session after fraud detection"
            );
            return e;
        }

        self.events.emit(SecurityEvent::FraudDetected {
            session_id,
            identity,
            recorded,
            presented: presented.clone(),
        });
        AuthError::FraudDetected
    }

    async fn refresh(
        &self,
        record: SessionToken,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSession> {
        let extended = checked_later(now, check_duration("session ttl", self.config.ttl)?)?;
        let mut updated = record.clone();
        updated.fingerprint = fingerprint.clone();
        updated.valid_until = record.valid_until.max(extended);
        updated.version += 1;

        let rotated_token = self.config.rotate_tokens.then(|| {
            let token = generate_session_token();
            updated.token_hash = TokenHash::of(&token);
            updated.regenerated_at = Some(now);
            token
        });

        match self
            .store
            .replace(&record.token_hash, record.version, &updated)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    session_id = %updated.id,
                    rotated = rotated_token.is_some(),
                    valid_until = %updated.valid_until,
                    "Session refreshed"
                );
                metrics::counter!("tokenwarden.session.validated").increment(1);
                if rotated_token.is_some() {
                    metrics::counter!("tokenwarden.session.rotated").increment(1);
                }

                Ok(ValidatedSession {
                    record: updated,
                    rotated_token,
                })
            }
            Err(AuthError::Conflict | AuthError::TokenCollision) if rotated_token.is_some() => {
                tracing::info!(
                    session_id = %record.id,
                    "Lost session rotation race, issuing a fresh session"
                );
                let issued = self
                    .issue(
                        record.identity,
                        fingerprint.clone(),
                        record.context,
                        record.metadata,
                    )
                    .await?;

                metrics::counter!("tokenwarden.session.validated").increment(1);
                Ok(ValidatedSession {
                    record: issued.record,
                    rotated_token: Some(issued.token),
                })
            }
            Err(AuthError::Conflict) => {
                tracing::debug!(
                    session_id = %record.id,
                    "Concurrent session refresh, failing this request"
                );
                Err(AuthError::Conflict)
            }
            Err(e) => {
                tracing::error!(session_id = %record.id, error = %e, "Failed to refresh session");
                Err(e)
            }
        }
    }

    /// Set `valid_until = now`, retrying once against a fresh read on conflict.
    async fn invalidate_record(
        &self,
        record: SessionToken,
        now: DateTime<Utc>,
        fraud_data: Option<Fingerprint>,
    ) -> Result<bool> {
        let mut current = record;
        let mut retried = false;

        loop {
            let mut updated = current.clone();
            updated.valid_until = now;
            updated.version += 1;
            if fraud_data.is_some() {
                updated.fraud_data.clone_from(&fraud_data);
            }

            match self
                .store
                .replace(&current.token_hash, current.version, &updated)
                .await
            {
                Ok(()) => return Ok(true),
                Err(AuthError::Conflict) if !retried => {
                    retried = true;
                    match self.store.find_by_id(current.id).await? {
                        Some(fresh) if fresh.is_active(now) => current = fresh,
                        _ => return Ok(false),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report_invalidation(&self, identity: &IdentityRef, count: usize) {
        tracing::info!(identity = %identity, count, "Sessions invalidated");
        metrics::counter!("tokenwarden.session.invalidated").increment(count as u64);

        self.events.emit(SecurityEvent::SessionInvalidated {
            identity: identity.clone(),
            count,
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::fraud::FraudPolicyKind;
    use crate::mocks::{ManualClock, MockSessionTokenStore, RecordingEventSink};
    use std::net::{IpAddr, Ipv4Addr};

    const HOME: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
    const CAFE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    fn firefox(ip: IpAddr) -> Fingerprint {
        Fingerprint::new(ip, "Mozilla/5.0 Firefox/128.0")
    }

    fn curl(ip: IpAddr) -> Fingerprint {
        Fingerprint::new(ip, "curl/8.5.0")
    }

    fn alice() -> IdentityRef {
        IdentityRef::new("user", "alice")
    }

    fn manager(
        config: SessionConfig,
    ) -> (
        SessionManager<MockSessionTokenStore, ManualClock>,
        MockSessionTokenStore,
        ManualClock,
        RecordingEventSink,
    ) {
        let store = MockSessionTokenStore::new();
        let clock = ManualClock::default();
        let sink = RecordingEventSink::new();
        let manager = SessionManager::new(store.clone(), config)
            .with_clock(clock.clone())
            .with_event_sink(sink.clone());
        (manager, store, clock, sink)
    }

    #[tokio::test]
    async fn test_issue_stores_hash_only() {
        let (manager, store, clock, sink) = manager(SessionConfig::default());

        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        let records = store.all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_hash, TokenHash::of(&issued.token));
        assert_ne!(records[0].token_hash.as_str(), issued.token);
        assert_eq!(records[0].valid_until, clock.now() + Duration::days(14));
        assert_eq!(sink.count("session_issued"), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_a_configuration_error() {
        let (manager, store, _clock, _sink) =
            manager(SessionConfig::new(Duration::days(100_000_000)));

        let result = manager.issue(alice(), firefox(HOME), None, Metadata::new()).await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));

        let result = manager
            .issue_with_ttl(alice(), firefox(HOME), None, Metadata::new(), Duration::hours(-1))
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
        assert!(store.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_extends_validity() {
        let (manager, _store, clock, _sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        clock.advance(Duration::days(3));
        let validated = manager
            .validate(&issued.token, &firefox(HOME), None)
            .await
            .unwrap();

        assert_eq!(validated.identity(), &alice());
        assert_eq!(validated.valid_until(), clock.now() + Duration::days(14));
        assert!(validated.valid_until() > issued.record.valid_until);
        assert!(validated.rotated_token.is_none());
    }

    #[tokio::test]
    async fn test_validate_after_expiry_fails() {
        let (manager, _store, clock, sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        clock.advance(Duration::days(14));
        let result = manager.validate(&issued.token, &firefox(HOME), None).await;

        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
        assert_eq!(sink.count("invalid_token"), 1);
    }

    #[tokio::test]
    async fn test_short_token_rejected_without_lookup() {
        let (manager, _store, _clock, sink) = manager(SessionConfig::default());

        let result = manager.validate("abc", &firefox(HOME), None).await;

        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
        assert_eq!(sink.count("invalid_token"), 1);
    }

    #[tokio::test]
    async fn test_context_mismatch_is_invalid() {
        let (manager, _store, _clock, _sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), Some("admin".into()), Metadata::new())
            .await
            .unwrap();

        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), Some("shop"))
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), None)
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
        assert!(
            manager
                .validate(&issued.token, &firefox(HOME), Some("admin"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_conjunctive_fraud_invalidates_record() {
        let (manager, store, clock, sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        let result = manager.validate(&issued.token, &curl(CAFE), None).await;
        assert_eq!(result.unwrap_err(), AuthError::FraudDetected);

        let record = store.find_by_id(issued.record.id).await.unwrap().unwrap();
        assert_eq!(record.valid_until, clock.now());
        assert_eq!(record.fraud_data, Some(curl(CAFE)));
        assert_eq!(sink.count("fraud_detected"), 1);

        // The legitimate client is signed out as well
        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), None)
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_conjunctive_tolerates_single_change() {
        let (manager, _store, _clock, sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        let roamed = manager
            .validate(&issued.token, &firefox(CAFE), None)
            .await
            .unwrap();
        assert_eq!(roamed.record.fingerprint, firefox(CAFE));

        // Recorded fingerprint is now CAFE/firefox; only the UA changes here
        manager
            .validate(&issued.token, &curl(CAFE), None)
            .await
            .unwrap();
        assert_eq!(sink.count("fraud_detected"), 0);
    }

    #[tokio::test]
    async fn test_strict_policy_flags_user_agent_change() {
        let config = SessionConfig::default().with_fraud_policy(FraudPolicyKind::Strict);
        let (manager, _store, _clock, _sink) = manager(config);
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        assert_eq!(
            manager
                .validate(&issued.token, &curl(HOME), None)
                .await
                .unwrap_err(),
            AuthError::FraudDetected
        );
    }

    #[tokio::test]
    async fn test_custom_policy_closure() {
        let (manager, _store, _clock, _sink) = manager(SessionConfig::default());
        let manager = manager.with_fraud_policy(|recorded: &Fingerprint, presented: &Fingerprint| {
            recorded.ip != presented.ip
        });
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        assert_eq!(
            manager
                .validate(&issued.token, &firefox(CAFE), None)
                .await
                .unwrap_err(),
            AuthError::FraudDetected
        );
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_token() {
        let (manager, _store, _clock, _sink) =
            manager(SessionConfig::default().with_rotation(true));
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        let validated = manager
            .validate(&issued.token, &firefox(HOME), None)
            .await
            .unwrap();
        let new_token = validated.rotated_token.expect("rotation enabled");
        assert_ne!(new_token, issued.token);
        assert!(validated.record.regenerated_at.is_some());

        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), None)
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
        assert!(manager.validate(&new_token, &firefox(HOME), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotation_conflict_issues_fresh_session() {
        let (manager, store, _clock, _sink) =
            manager(SessionConfig::default().with_rotation(true));
        let mut metadata = Metadata::new();
        metadata.insert("device".into(), serde_json::json!("ios"));
        let issued = manager
            .issue(alice(), firefox(HOME), Some("app".into()), metadata.clone())
            .await
            .unwrap();

        store.fail_next_replace(AuthError::Conflict).unwrap();
        let validated = manager
            .validate(&issued.token, &firefox(HOME), Some("app"))
            .await
            .unwrap();

        assert_ne!(validated.record.id, issued.record.id);
        assert_eq!(validated.record.identity, alice());
        assert_eq!(validated.record.context.as_deref(), Some("app"));
        assert_eq!(validated.record.metadata, metadata);
        let fresh = validated.rotated_token.unwrap();
        assert!(manager.validate(&fresh, &firefox(HOME), Some("app")).await.is_ok());
    }

    #[tokio::test]
    async fn test_extension_conflict_fails_single_request() {
        let (manager, store, _clock, _sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        store.fail_next_replace(AuthError::Conflict).unwrap();
        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), None)
                .await
                .unwrap_err(),
            AuthError::Conflict
        );

        // Token survives; the next request succeeds
        assert!(manager.validate(&issued.token, &firefox(HOME), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_issue_retries_collisions_then_gives_up() {
        let config = SessionConfig::default().with_max_issue_attempts(3);
        let (manager, store, _clock, _sink) = manager(config);

        store.fail_next_insert(AuthError::TokenCollision).unwrap();
        store.fail_next_insert(AuthError::TokenCollision).unwrap();
        assert!(
            manager
                .issue(alice(), firefox(HOME), None, Metadata::new())
                .await
                .is_ok()
        );

        for _ in 0..3 {
            store.fail_next_insert(AuthError::TokenCollision).unwrap();
        }
        let result = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_issue_retries_one_conflict() {
        let (manager, store, _clock, _sink) = manager(SessionConfig::default());

        store.fail_next_insert(AuthError::Conflict).unwrap();
        assert!(
            manager
                .issue(alice(), firefox(HOME), None, Metadata::new())
                .await
                .is_ok()
        );

        store.fail_next_insert(AuthError::Conflict).unwrap();
        store.fail_next_insert(AuthError::Conflict).unwrap();
        assert_eq!(
            manager
                .issue(alice(), firefox(HOME), None, Metadata::new())
                .await
                .unwrap_err(),
            AuthError::Conflict
        );
    }

    #[tokio::test]
    async fn test_invalidate_token_is_idempotent() {
        let (manager, _store, _clock, sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        assert!(manager.invalidate_token(&issued.token).await.unwrap());
        assert!(!manager.invalidate_token(&issued.token).await.unwrap());
        assert!(!manager.invalidate_token("never-issued-token").await.unwrap());
        assert_eq!(sink.count("session_invalidated"), 1);

        assert_eq!(
            manager
                .validate(&issued.token, &firefox(HOME), None)
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_invalidate_identity_with_metadata_filter() {
        let (manager, _store, _clock, _sink) = manager(SessionConfig::default());

        let tagged = |device: &str| {
            let mut metadata = Metadata::new();
            metadata.insert("device".into(), serde_json::json!(device));
            metadata
        };

        let phone = manager
            .issue(alice(), firefox(HOME), None, tagged("phone"))
            .await
            .unwrap();
        let laptop = manager
            .issue(alice(), firefox(HOME), None, tagged("laptop"))
            .await
            .unwrap();
        let bob = manager
            .issue(IdentityRef::new("user", "bob"), firefox(HOME), None, tagged("phone"))
            .await
            .unwrap();

        let count = manager
            .invalidate_identity(&alice(), &tagged("phone"))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(manager.validate(&phone.token, &firefox(HOME), None).await.is_err());
        assert!(manager.validate(&laptop.token, &firefox(HOME), None).await.is_ok());
        assert!(manager.validate(&bob.token, &firefox(HOME), None).await.is_ok());

        let count = manager
            .invalidate_identity(&alice(), &Metadata::new())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(manager.active_sessions(&alice()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_session_by_id() {
        let (manager, _store, _clock, _sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        assert!(manager.invalidate_session(issued.record.id).await.unwrap());
        assert!(!manager.invalidate_session(issued.record.id).await.unwrap());
        assert!(!manager.invalidate_session(SessionTokenId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_identity_does_not_refresh() {
        let (manager, store, _clock, _sink) = manager(SessionConfig::default());
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        assert_eq!(manager.find_identity(&issued.token).await.unwrap(), Some(alice()));
        assert_eq!(manager.find_identity("unknown-token-value").await.unwrap(), None);

        let record = store.find_by_id(issued.record.id).await.unwrap().unwrap();
        assert_eq!(record.version, 0);
    }

    #[tokio::test]
    async fn test_concurrent_validation_with_rotation_never_shares_a_token() {
        let (manager, _store, _clock, _sink) =
            manager(SessionConfig::default().with_rotation(true));
        let issued = manager
            .issue(alice(), firefox(HOME), None, Metadata::new())
            .await
            .unwrap();

        let fingerprint = firefox(HOME);
        let (first, second) = tokio::join!(
            manager.validate(&issued.token, &fingerprint, None),
            manager.validate(&issued.token, &fingerprint, None),
        );

        let tokens: Vec<String> = [first, second]
            .into_iter()
            .filter_map(|result| result.ok().and_then(|v| v.rotated_token))
            .collect();
        assert!(!tokens.is_empty());
        if let [a, b] = tokens.as_slice() {
            assert_ne!(a, b);
        }
        assert!(manager.validate(&issued.token, &firefox(HOME), None).await.is_err());
    }
}
