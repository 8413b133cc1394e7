//! End-to-end session lifecycle scenarios.
//!
//! Each test drives the orchestrator through a user-visible flow and then
//! inspects the ledger: which records are active, what the active pointer
//! names, and which invalidation entries were written.
#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use common::{Fixture, PASSWORD, RecordingLogger, StallingStore};
use tokenward_authn::AuthError;
use tokenward_session::{MemoryUserDirectory, SessionConfig, SessionError, SessionOrchestrator};
use tokenward_storage::{
    Clock, InvalidationReason, MemorySessionStore, SessionScope, SessionStore, StorageError,
    session::audit::AuditAction, testutil::ManualClock,
};

// ===========================================================================
// Login
// ===========================================================================

#[tokio::test]
async fn second_login_retires_first_with_new_login() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");

    let s1 = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("first login");
    let s2 = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("second login");

    assert_eq!(f.reasons_for(&s1.session_id).await, vec![InvalidationReason::NewLogin]);
    assert_eq!(f.reasons_for(&s1.refresh_session_id).await, vec![InvalidationReason::NewLogin]);
    assert!(f.reasons_for(&s2.session_id).await.is_empty());

    let pointer = f.orchestrator.active_session(&user).await.expect("pointer").expect("present");
    assert_eq!(pointer.session_id, s2.session_id);
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 1);

    // Access tokens are verified statelessly, so the retired one still
    // verifies until it expires.
    assert!(f.orchestrator.verify(&s1.access_token).is_ok());
}

#[tokio::test]
async fn failed_login_leaves_existing_session_alone() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let s1 = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    let result = f.orchestrator.login("alice@example.com", "wrong password").await;
    assert!(matches!(result, Err(SessionError::InvalidCredentials)));

    assert!(f.orchestrator.ledger().is_active(&s1.session_id).await.expect("is_active"));
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 1);
}

// ===========================================================================
// Refresh and reuse detection
// ===========================================================================

#[tokio::test]
async fn refresh_rotates_pair_and_rejects_replay() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let s2 = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    f.clock.advance(ChronoDuration::minutes(1));
    let s3 = f.orchestrator.refresh(&s2.refresh_token).await.expect("refresh");

    assert_eq!(f.reasons_for(&s2.refresh_session_id).await, vec![InvalidationReason::Refreshed]);
    assert_eq!(f.reasons_for(&s2.session_id).await, vec![InvalidationReason::Refreshed]);
    let pointer = f.orchestrator.active_session(&user).await.expect("pointer").expect("present");
    assert_eq!(pointer.session_id, s3.session_id);

    let replay = f.orchestrator.refresh(&s2.refresh_token).await;
    assert!(matches!(replay, Err(SessionError::ExpiredRefreshToken)));

    // The replay changed nothing.
    assert!(f.orchestrator.ledger().is_active(&s3.session_id).await.expect("is_active"));
    assert_eq!(f.reasons_for(&s2.refresh_session_id).await.len(), 1);

    let metrics = f.orchestrator.metrics().snapshot();
    assert_eq!(metrics.refreshes, 1);
    assert_eq!(metrics.reuse_rejections, 1);
}

#[tokio::test]
async fn refresh_chain_keeps_subject_and_user() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let mut tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    for _ in 0..3 {
        f.clock.advance(ChronoDuration::minutes(10));
        tokens = f.orchestrator.refresh(&tokens.refresh_token).await.expect("refresh");
    }

    let claims = f.orchestrator.verify(&tokens.access_token).expect("verify");
    assert_eq!(claims.uid, user);
    assert_eq!(claims.sub, "alice@example.com");
    assert_eq!(claims.sid, tokens.session_id);
    assert_eq!(claims.scope, SessionScope::Login);
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 1);
}

#[tokio::test]
async fn refresh_after_new_login_is_rejected() {
    let f = Fixture::new().await;
    f.add_user("alice@example.com", "u-a");
    let old = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");
    f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login again");

    let result = f.orchestrator.refresh(&old.refresh_token).await;
    assert!(matches!(result, Err(SessionError::ExpiredRefreshToken)));
}

#[tokio::test(start_paused = true)]
async fn refresh_fails_closed_when_storage_stalls() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(StallingStore::new(MemorySessionStore::new()));
    let directory = MemoryUserDirectory::new();
    directory.insert(
        "alice@example.com",
        tokenward_session::UserAccount::builder()
            .id("u-a")
            .password_hash(bcrypt::hash(PASSWORD, 4).expect("hash"))
            .build(),
    );
    let config = SessionConfig::builder()
        .storage_timeout(Duration::from_millis(250))
        .build()
        .expect("config");
    let orchestrator = SessionOrchestrator::builder()
        .config(config)
        .store(store.clone())
        .directory(Arc::new(directory))
        .clock(clock)
        .build()
        .expect("orchestrator");
    orchestrator.rotate_keys().await.expect("rotate");

    let tokens = orchestrator.login("alice@example.com", PASSWORD).await.expect("login");
    store.stall();

    let result = orchestrator.refresh(&tokens.refresh_token).await;
    assert!(
        matches!(result, Err(SessionError::Storage(StorageError::Timeout))),
        "expected timeout, got {result:?}"
    );
}

// ===========================================================================
// Logoff and forced invalidation
// ===========================================================================

#[tokio::test]
async fn logoff_retires_pair_and_removes_pointer() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    f.orchestrator.logoff(&tokens.access_token).await.expect("logoff");

    assert_eq!(f.reasons_for(&tokens.session_id).await, vec![InvalidationReason::Logoff]);
    assert_eq!(f.reasons_for(&tokens.refresh_session_id).await, vec![InvalidationReason::Logoff]);
    assert!(f.orchestrator.active_session(&user).await.expect("pointer").is_none());
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 0);

    // Second logoff is a no-op, not a double invalidation.
    f.orchestrator.logoff(&tokens.access_token).await.expect("second logoff");
    assert_eq!(f.reasons_for(&tokens.session_id).await.len(), 1);

    let refresh = f.orchestrator.refresh(&tokens.refresh_token).await;
    assert!(matches!(refresh, Err(SessionError::ExpiredRefreshToken)));
}

#[tokio::test]
async fn password_change_forces_relogin() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    let retired = f
        .orchestrator
        .invalidate_for_user(&user, InvalidationReason::PasswordChanged)
        .await
        .expect("invalidate")
        .expect("a session was active");
    assert_eq!(retired.session_id, tokens.session_id);

    assert_eq!(f.reasons_for(&tokens.session_id).await, vec![InvalidationReason::PasswordChanged]);
    assert!(f.orchestrator.active_session(&user).await.expect("pointer").is_none());

    let refresh = f.orchestrator.refresh(&tokens.refresh_token).await;
    assert!(matches!(refresh, Err(SessionError::ExpiredRefreshToken)));

    // Invalidating again is a no-op.
    let again =
        f.orchestrator.invalidate_for_user(&user, InvalidationReason::PasswordChanged).await;
    assert!(again.expect("invalidate").is_none());

    f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login after change");
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 1);
}

// ===========================================================================
// Recovery tokens
// ===========================================================================

#[tokio::test]
async fn recovery_token_is_single_use_and_resets_session() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    let recovery = f.orchestrator.issue_recovery_token("alice@example.com").await.expect("issue");
    // Issuing does not disturb the current session.
    assert!(f.orchestrator.ledger().is_active(&tokens.session_id).await.expect("is_active"));

    let redeemed = f.orchestrator.redeem_recovery_token(&recovery.token).await.expect("redeem");
    assert_eq!(redeemed, user);
    assert_eq!(f.reasons_for(&tokens.session_id).await, vec![InvalidationReason::PasswordReset]);
    assert!(f.orchestrator.active_session(&user).await.expect("pointer").is_none());

    let second = f.orchestrator.redeem_recovery_token(&recovery.token).await;
    assert!(matches!(second, Err(SessionError::ExpiredRefreshToken)));
}

#[tokio::test]
async fn recovery_token_scope_is_enforced() {
    let f = Fixture::new().await;
    f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");
    let recovery = f.orchestrator.issue_recovery_token("alice@example.com").await.expect("issue");

    assert!(matches!(
        f.orchestrator.verify(&recovery.token),
        Err(SessionError::Auth(AuthError::ScopeMismatch { .. }))
    ));
    assert!(matches!(
        f.orchestrator.refresh(&recovery.token).await,
        Err(SessionError::ExpiredRefreshToken)
    ));
    assert!(matches!(
        f.orchestrator.redeem_recovery_token(&tokens.access_token).await,
        Err(SessionError::ExpiredRefreshToken)
    ));
    assert!(matches!(
        f.orchestrator.logoff(&recovery.token).await,
        Err(SessionError::Auth(AuthError::ScopeMismatch { .. }))
    ));
}

#[tokio::test]
async fn recovery_token_expires() {
    let f = Fixture::new().await;
    f.add_user("alice@example.com", "u-a");
    let recovery = f.orchestrator.issue_recovery_token("alice@example.com").await.expect("issue");

    f.clock.advance(ChronoDuration::minutes(15));
    let result = f.orchestrator.redeem_recovery_token(&recovery.token).await;
    assert!(matches!(result, Err(SessionError::ExpiredRefreshToken)));
}

#[tokio::test]
async fn recovery_for_unknown_or_blocked_user() {
    let f = Fixture::new().await;
    f.add_user("blocked@example.com", "u-b");
    f.directory.set_blocked("blocked@example.com", true);

    assert!(matches!(
        f.orchestrator.issue_recovery_token("nobody@example.com").await,
        Err(SessionError::UserNotFound)
    ));
    assert!(matches!(
        f.orchestrator.issue_recovery_token("blocked@example.com").await,
        Err(SessionError::UserBlocked)
    ));
}

// ===========================================================================
// Sweep
// ===========================================================================

#[tokio::test]
async fn sweep_retires_expired_once() {
    let config = SessionConfig::builder()
        .session_ttl(Duration::from_secs(15 * 60))
        .build()
        .expect("config");
    let f = Fixture::with_config(config).await;
    let user = f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    f.clock.advance(ChronoDuration::minutes(20));
    let swept = f.orchestrator.sweep_expired().await.expect("sweep");
    assert_eq!(swept.len(), 2);
    assert_eq!(f.reasons_for(&tokens.session_id).await, vec![InvalidationReason::Expired]);
    assert_eq!(f.reasons_for(&tokens.refresh_session_id).await, vec![InvalidationReason::Expired]);
    assert_eq!(f.orchestrator.count_active_sessions(&user).await.expect("count"), 0);

    let again = f.orchestrator.sweep_expired().await.expect("sweep again");
    assert!(again.is_empty());
    assert_eq!(f.reasons_for(&tokens.session_id).await.len(), 1);
}

#[tokio::test]
async fn sweep_leaves_young_sessions() {
    let f = Fixture::new().await;
    let user = f.add_user("alice@example.com", "u-a");
    let ledger = f.orchestrator.ledger();
    let old = ledger
        .begin_session(&user, SessionScope::Recover, Duration::from_secs(15 * 60))
        .await
        .expect("begin");

    f.clock.advance(ChronoDuration::minutes(20));
    let cutoff = f.clock.now() - ChronoDuration::minutes(15);
    let young = ledger
        .begin_session(&user, SessionScope::Recover, Duration::from_secs(15 * 60))
        .await
        .expect("begin");

    let swept = ledger.sweep_expired(cutoff).await.expect("sweep");
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].session_id, old.session_id);
    assert!(ledger.is_active(&young.session_id).await.expect("is_active"));
}

#[tokio::test]
async fn swept_refresh_token_cannot_be_used() {
    let f = Fixture::new().await;
    f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");

    // The token itself is still within its lifetime; only the record is gone.
    f.clock.advance(ChronoDuration::hours(1));
    f.orchestrator.ledger().sweep_expired(f.clock.now()).await.expect("sweep");

    let result = f.orchestrator.refresh(&tokens.refresh_token).await;
    assert!(matches!(result, Err(SessionError::ExpiredRefreshToken)));
}

// ===========================================================================
// Keys
// ===========================================================================

#[tokio::test]
async fn tokens_survive_rotation() {
    let f = Fixture::new().await;
    f.add_user("alice@example.com", "u-a");
    let tokens = f.orchestrator.login("alice@example.com", PASSWORD).await.expect("login");
    let old_kid = f.orchestrator.key_authority().current_signing_key().expect("key").kid.clone();

    f.orchestrator.rotate_keys().await.expect("rotate");
    let new_kid = f.orchestrator.key_authority().current_signing_key().expect("key").kid.clone();
    assert_ne!(old_kid, new_kid);
    assert!(f.orchestrator.key_authority().public_key(old_kid.as_str()).is_ok());
    assert!(f.orchestrator.verify(&tokens.access_token).is_ok());

    let published = f.orchestrator.publishable_key_set();
    assert_eq!(published.keys[0].kid, new_kid);
    assert!(published.find(old_kid.as_str()).is_some());

    // Refresh works across the rotation; the new pair is signed by the new key.
    let renewed = f.orchestrator.refresh(&tokens.refresh_token).await.expect("refresh");
    assert!(f.orchestrator.verify(&renewed.access_token).is_ok());
}

// ===========================================================================
// Auditing
// ===========================================================================

#[tokio::test]
async fn audit_logger_sees_session_and_key_events() {
    let logger = Arc::new(RecordingLogger::default());
    let clock = Arc::new(ManualClock::default());
    let directory = MemoryUserDirectory::new();
    directory.insert(
        "alice@example.com",
        tokenward_session::UserAccount::builder()
            .id("u-a")
            .password_hash(bcrypt::hash(PASSWORD, 4).expect("hash"))
            .build(),
    );
    let store = MemorySessionStore::new();
    let orchestrator = SessionOrchestrator::builder()
        .store(Arc::new(store.clone()))
        .directory(Arc::new(directory))
        .clock(clock)
        .audit_logger(logger.clone())
        .build()
        .expect("orchestrator");

    orchestrator.rotate_keys().await.expect("rotate");
    let tokens = orchestrator.login("alice@example.com", PASSWORD).await.expect("login");
    orchestrator.logoff(&tokens.access_token).await.expect("logoff");

    let actions: Vec<AuditAction> =
        logger.events.lock().iter().map(|event| event.action).collect();
    assert_eq!(actions[0], AuditAction::RotateKey);
    assert!(actions.contains(&AuditAction::BeginSession));
    assert!(actions.contains(&AuditAction::SetActivePointer));
    assert!(actions.contains(&AuditAction::DeleteActivePointer));
    assert_eq!(actions.iter().filter(|a| **a == AuditAction::RetireSession).count(), 2);

    // The audited wrapper writes through to the caller's store.
    assert_eq!(store.invalidations_for_session(&tokens.session_id).await.expect("read").len(), 1);
}
