//! Session lifecycle integration tests.
//!
//! Drives [`SessionManager`] through the harness from `tokenwarden-testing`:
//!
//! - Issuance, sliding expiry and context scoping
//! - Fraud detection and the invalidation it triggers
//! - Rotation, including lost rotation races
//! - Single, per-record and bulk sign-out

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use serde_json::json;
use tokenwarden_auth::{
    AuthError, Clock, FraudPolicyKind, Metadata, SessionConfig, SessionManager,
    TokenwardenConfig,
};
use tokenwarden_testing::TestHarness;
use tokenwarden_testing::helpers::{
    alice, bob, foreign_fingerprint, home_fingerprint, init_tracing, roaming_fingerprint,
};

fn harness_with(session: SessionConfig) -> TestHarness {
    init_tracing();
    TestHarness::with_config(TokenwardenConfig {
        session,
        ..TokenwardenConfig::default()
    })
}

fn device(name: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("device".into(), json!(name));
    metadata
}

#[tokio::test]
async fn test_issued_token_validates_and_slides() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();
    let (alice, _) = alice();

    let issued = sessions
        .issue(alice.clone(), home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();
    assert_eq!(issued.record.valid_until, harness.clock.now() + Duration::days(14));

    harness.clock.advance(Duration::days(10));
    let validated = sessions
        .validate(&issued.token, &home_fingerprint(), None)
        .await
        .unwrap();

    assert_eq!(validated.identity(), &alice);
    assert_eq!(validated.valid_until(), harness.clock.now() + Duration::days(14));
    assert!(validated.rotated_token.is_none());

    // Would have expired at day 14 without the refresh.
    harness.clock.advance(Duration::days(10));
    assert!(
        sessions
            .validate(&issued.token, &home_fingerprint(), None)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_expired_token_is_invalid() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    harness.clock.advance(Duration::days(14));
    let result = sessions.validate(&issued.token, &home_fingerprint(), None).await;

    assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    assert_eq!(harness.events.count("invalid_token"), 1);
    assert!(sessions.find_identity(&issued.token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_and_short_tokens_are_invalid() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    for token in ["", "abc", "definitely-not-issued-by-us"] {
        let result = sessions.validate(token, &home_fingerprint(), None).await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    }
    assert_eq!(harness.events.count("invalid_token"), 3);
}

#[tokio::test]
async fn test_context_must_match() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), Some("admin".into()), Metadata::new())
        .await
        .unwrap();

    for context in [None, Some("api")] {
        let result = sessions.validate(&issued.token, &home_fingerprint(), context).await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    }
    assert!(
        sessions
            .validate(&issued.token, &home_fingerprint(), Some("admin"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_roaming_client_is_accepted_and_fingerprint_updated() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    let validated = sessions
        .validate(&issued.token, &roaming_fingerprint(), None)
        .await
        .unwrap();
    assert_eq!(validated.record.fingerprint, roaming_fingerprint());
    assert_eq!(harness.events.count("fraud_detected"), 0);
}

#[tokio::test]
async fn test_stolen_token_is_revoked() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();
    let (alice, _) = alice();

    let issued = sessions
        .issue(alice.clone(), home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    let result = sessions
        .validate(&issued.token, &foreign_fingerprint(), None)
        .await;
    assert_eq!(result.unwrap_err(), AuthError::FraudDetected);

    // The legitimate owner is signed out too.
    let result = sessions.validate(&issued.token, &home_fingerprint(), None).await;
    assert_eq!(result.unwrap_err(), AuthError::InvalidToken);

    let stored = harness.session_store.all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].fraud_data, Some(foreign_fingerprint()));
    assert_eq!(stored[0].valid_until, harness.clock.now());
    assert_eq!(harness.events.count("fraud_detected"), 1);
    assert!(sessions.active_sessions(&alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_strict_policy_flags_user_agent_change() {
    let harness = harness_with(SessionConfig::default().with_fraud_policy(FraudPolicyKind::Strict));
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    let mut new_browser = home_fingerprint();
    new_browser.user_agent = Some("Chrome/126.0".into());
    let result = sessions.validate(&issued.token, &new_browser, None).await;
    assert_eq!(result.unwrap_err(), AuthError::FraudDetected);
}

#[tokio::test]
async fn test_disabled_policy_accepts_anything() {
    let harness =
        harness_with(SessionConfig::default().with_fraud_policy(FraudPolicyKind::Disabled));
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    assert!(
        sessions
            .validate(&issued.token, &foreign_fingerprint(), None)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_custom_policy_closure() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness
        .sessions()
        .with_fraud_policy(|recorded: &tokenwarden_auth::Fingerprint,
                            presented: &tokenwarden_auth::Fingerprint| {
            recorded.ip != presented.ip
        });

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    let result = sessions
        .validate(&issued.token, &roaming_fingerprint(), None)
        .await;
    assert_eq!(result.unwrap_err(), AuthError::FraudDetected);
}

#[tokio::test]
async fn test_rotation_replaces_token() {
    let harness = harness_with(SessionConfig::default().with_rotation(true));
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    let validated = sessions
        .validate(&issued.token, &home_fingerprint(), None)
        .await
        .unwrap();
    let rotated = validated.rotated_token.clone().unwrap();

    assert_ne!(rotated, issued.token);
    assert_eq!(validated.record.id, issued.record.id);
    assert_eq!(validated.record.regenerated_at, Some(harness.clock.now()));

    let result = sessions.validate(&issued.token, &home_fingerprint(), None).await;
    assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    assert!(sessions.validate(&rotated, &home_fingerprint(), None).await.is_ok());
}

#[tokio::test]
async fn test_lost_rotation_race_issues_fresh_session() {
    let harness = harness_with(SessionConfig::default().with_rotation(true));
    let sessions = harness.sessions();
    let (alice, _) = alice();

    let issued = sessions
        .issue(alice.clone(), home_fingerprint(), Some("web".into()), device("laptop"))
        .await
        .unwrap();

    harness.session_store.fail_next_replace(AuthError::Conflict).unwrap();
    let validated = sessions
        .validate(&issued.token, &home_fingerprint(), Some("web"))
        .await
        .unwrap();

    assert_ne!(validated.record.id, issued.record.id);
    assert_eq!(validated.identity(), &alice);
    assert_eq!(validated.record.context.as_deref(), Some("web"));
    assert_eq!(validated.record.metadata, device("laptop"));

    let fresh = validated.rotated_token.unwrap();
    assert!(sessions.validate(&fresh, &home_fingerprint(), Some("web")).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_extension_conflict_keeps_session() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    harness.session_store.fail_next_replace(AuthError::Conflict).unwrap();
    let result = sessions.validate(&issued.token, &home_fingerprint(), None).await;
    assert_eq!(result.unwrap_err(), AuthError::Conflict);
    assert_eq!(harness.events.count("invalid_token"), 0);

    assert!(sessions.validate(&issued.token, &home_fingerprint(), None).await.is_ok());
}

#[tokio::test]
async fn test_issuance_retries_collisions_then_gives_up() {
    let harness = harness_with(SessionConfig::default().with_max_issue_attempts(3));
    let sessions = harness.sessions();

    harness.session_store.fail_next_insert(AuthError::TokenCollision).unwrap();
    assert!(
        sessions
            .issue(alice().0, home_fingerprint(), None, Metadata::new())
            .await
            .is_ok()
    );

    for _ in 0..3 {
        harness.session_store.fail_next_insert(AuthError::TokenCollision).unwrap();
    }
    let result = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await;
    assert!(matches!(result, Err(AuthError::Configuration(_))));
    assert_eq!(harness.session_store.all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_issue_with_custom_ttl() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue_with_ttl(alice().0, home_fingerprint(), None, Metadata::new(), Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(issued.record.valid_until, harness.clock.now() + Duration::hours(1));

    // Refresh grants the configured TTL.
    let validated = sessions
        .validate(&issued.token, &home_fingerprint(), None)
        .await
        .unwrap();
    assert_eq!(validated.valid_until(), harness.clock.now() + Duration::days(14));
}

#[tokio::test]
async fn test_logout_single_token() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();
    let (alice, _) = alice();

    let laptop = sessions
        .issue(alice.clone(), home_fingerprint(), None, device("laptop"))
        .await
        .unwrap();
    let phone = sessions
        .issue(alice.clone(), home_fingerprint(), None, device("phone"))
        .await
        .unwrap();

    assert!(sessions.invalidate_token(&laptop.token).await.unwrap());
    assert!(!sessions.invalidate_token(&laptop.token).await.unwrap());

    assert!(sessions.validate(&laptop.token, &home_fingerprint(), None).await.is_err());
    assert!(sessions.validate(&phone.token, &home_fingerprint(), None).await.is_ok());
    assert_eq!(harness.events.count("session_invalidated"), 1);
}

#[tokio::test]
async fn test_invalidate_by_record_id() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();

    let issued = sessions
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();

    assert!(sessions.invalidate_session(issued.record.id).await.unwrap());
    assert!(!sessions.invalidate_session(issued.record.id).await.unwrap());
    assert!(sessions.validate(&issued.token, &home_fingerprint(), None).await.is_err());
}

#[tokio::test]
async fn test_bulk_invalidation_respects_metadata_filter() {
    let harness = harness_with(SessionConfig::default());
    let sessions = harness.sessions();
    let (alice, _) = alice();
    let (bob, _) = bob();

    let laptop = sessions
        .issue(alice.clone(), home_fingerprint(), None, device("laptop"))
        .await
        .unwrap();
    let phone = sessions
        .issue(alice.clone(), home_fingerprint(), None, device("phone"))
        .await
        .unwrap();
    let bobs = sessions
        .issue(bob.clone(), home_fingerprint(), None, device("phone"))
        .await
        .unwrap();

    assert_eq!(sessions.invalidate_identity(&alice, &device("phone")).await.unwrap(), 1);
    assert!(sessions.validate(&laptop.token, &home_fingerprint(), None).await.is_ok());
    assert!(sessions.validate(&phone.token, &home_fingerprint(), None).await.is_err());

    assert_eq!(sessions.invalidate_identity(&alice, &Metadata::new()).await.unwrap(), 1);
    assert!(sessions.active_sessions(&alice).await.unwrap().is_empty());

    // Other identities are untouched.
    assert!(sessions.validate(&bobs.token, &home_fingerprint(), None).await.is_ok());
}

#[tokio::test]
async fn test_managers_share_store() {
    let harness = harness_with(SessionConfig::default());
    let first = harness.sessions();
    let second: SessionManager<_, _> = harness.sessions();

    let issued = first
        .issue(alice().0, home_fingerprint(), None, Metadata::new())
        .await
        .unwrap();
    assert_eq!(
        second.find_identity(&issued.token).await.unwrap(),
        Some(alice().0)
    );
}
