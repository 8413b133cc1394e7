//! Concurrency and interleaving tests for the single-active-session rule.
//!
//! The multi-threaded tests race flows for the same user against each other;
//! the property test replays random operation sequences against a small
//! model of what should be active.
#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{Fixture, PASSWORD};
use proptest::prelude::*;
use tokenward_session::{SessionConfig, SessionError, TokenPair};
use tokenward_storage::{Clock, InvalidationReason, UserId};
use tokio::task::JoinSet;

const IDENTITY: &str = "alice@example.com";

/// Asserts at most one active LOGIN record and that the pointer, if any,
/// names an active record.
async fn assert_single_active(f: &Fixture, user: &UserId) -> usize {
    let count = f.orchestrator.count_active_sessions(user).await.expect("count");
    assert!(count <= 1, "user has {count} active sessions");
    if count == 1 {
        let pointer = f
            .orchestrator
            .active_session(user)
            .await
            .expect("pointer")
            .expect("an active session has a pointer");
        assert!(f.orchestrator.ledger().is_active(&pointer.session_id).await.expect("is_active"));
    }
    count
}

// ===========================================================================
// Races
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logins_leave_one_session() {
    let f = Fixture::new().await;
    let user = f.add_user(IDENTITY, "u-a");

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let orchestrator = Arc::clone(&f.orchestrator);
        set.spawn(async move { orchestrator.login(IDENTITY, PASSWORD).await });
    }

    let mut sessions = Vec::new();
    while let Some(result) = set.join_next().await {
        sessions.push(result.expect("task").expect("login"));
    }

    assert_eq!(assert_single_active(&f, &user).await, 1);

    // Every login but the surviving one was retired exactly once.
    let mut retired = 0;
    for tokens in &sessions {
        let reasons = f.reasons_for(&tokens.session_id).await;
        assert!(reasons.len() <= 1);
        if reasons == [InvalidationReason::NewLogin] {
            retired += 1;
        }
    }
    assert_eq!(retired, sessions.len() - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_of_one_token_succeed_once() {
    let f = Fixture::new().await;
    let user = f.add_user(IDENTITY, "u-a");
    let tokens = f.orchestrator.login(IDENTITY, PASSWORD).await.expect("login");

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let orchestrator = Arc::clone(&f.orchestrator);
        let refresh_token = tokens.refresh_token.clone();
        set.spawn(async move { orchestrator.refresh(&refresh_token).await });
    }

    let mut succeeded = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task") {
            Ok(_) => succeeded += 1,
            Err(SessionError::ExpiredRefreshToken) => {},
            Err(e) => panic!("unexpected refresh error: {e}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(assert_single_active(&f, &user).await, 1);
    assert_eq!(f.reasons_for(&tokens.refresh_session_id).await, vec![InvalidationReason::Refreshed]);
    assert_eq!(f.orchestrator.metrics().snapshot().reuse_rejections, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logins_racing_refreshes_keep_one_session() {
    let f = Fixture::new().await;
    let user = f.add_user(IDENTITY, "u-a");
    let tokens = f.orchestrator.login(IDENTITY, PASSWORD).await.expect("login");

    let mut set = JoinSet::new();
    for i in 0..20 {
        let orchestrator = Arc::clone(&f.orchestrator);
        let refresh_token = tokens.refresh_token.clone();
        set.spawn(async move {
            if i % 2 == 0 {
                orchestrator.login(IDENTITY, PASSWORD).await.map(|_| false)
            } else {
                orchestrator.refresh(&refresh_token).await.map(|_| true)
            }
        });
    }

    let mut refreshed = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task") {
            Ok(true) => refreshed += 1,
            Ok(false) | Err(SessionError::ExpiredRefreshToken) => {},
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert!(refreshed <= 1, "the original refresh token was exchanged {refreshed} times");
    assert_eq!(assert_single_active(&f, &user).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_do_not_block_each_other() {
    let f = Fixture::new().await;
    let users: Vec<(String, UserId)> = (0..8)
        .map(|i| {
            let identity = format!("user{i}@example.com");
            let id = f.add_user(&identity, &format!("u-{i}"));
            (identity, id)
        })
        .collect();

    let mut set = JoinSet::new();
    for (identity, _) in &users {
        for _ in 0..4 {
            let orchestrator = Arc::clone(&f.orchestrator);
            let identity = identity.clone();
            set.spawn(async move { orchestrator.login(&identity, PASSWORD).await });
        }
    }
    while let Some(result) = set.join_next().await {
        result.expect("task").expect("login");
    }

    for (_, id) in &users {
        assert_eq!(assert_single_active(&f, id).await, 1);
    }
}

// ===========================================================================
// Random operation sequences
// ===========================================================================

const SWEEP_TTL_MINUTES: i64 = 20;

#[derive(Debug, Clone)]
enum Op {
    Login,
    Refresh,
    Replay,
    Logoff,
    Invalidate,
    AdvanceAndSweep(i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Login),
        3 => Just(Op::Refresh),
        1 => Just(Op::Replay),
        1 => Just(Op::Logoff),
        1 => Just(Op::Invalidate),
        2 => (1i64..30).prop_map(Op::AdvanceAndSweep),
    ]
}

/// What the test expects to be active.
#[derive(Default)]
struct Model {
    current: Option<(TokenPair, DateTime<Utc>)>,
    replaced: Vec<TokenPair>,
    live: bool,
}

async fn apply(f: &Fixture, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match op {
        Op::Login => {
            let tokens = f.orchestrator.login(IDENTITY, PASSWORD).await;
            let tokens = tokens.map_err(|e| TestCaseError::fail(format!("login: {e}")))?;
            if let Some((previous, _)) = model.current.take() {
                model.replaced.push(previous);
            }
            model.current = Some((tokens, f.clock.now()));
            model.live = true;
        },
        Op::Refresh => {
            let Some((tokens, created)) = model.current.take() else { return Ok(()) };
            let result = f.orchestrator.refresh(&tokens.refresh_token).await;
            if model.live {
                let renewed = result.map_err(|e| TestCaseError::fail(format!("refresh: {e}")))?;
                model.replaced.push(tokens);
                model.current = Some((renewed, f.clock.now()));
            } else {
                prop_assert!(matches!(result, Err(SessionError::ExpiredRefreshToken)));
                model.current = Some((tokens, created));
            }
        },
        Op::Replay => {
            let Some(stale) = model.replaced.last() else { return Ok(()) };
            let result = f.orchestrator.refresh(&stale.refresh_token).await;
            prop_assert!(matches!(result, Err(SessionError::ExpiredRefreshToken)));
        },
        Op::Logoff => {
            let Some((tokens, _)) = &model.current else { return Ok(()) };
            f.orchestrator
                .logoff(&tokens.refresh_token)
                .await
                .map_err(|e| TestCaseError::fail(format!("logoff: {e}")))?;
            model.live = false;
        },
        Op::Invalidate => {
            let user = UserId::from("u-a");
            f.orchestrator
                .invalidate_for_user(&user, InvalidationReason::PasswordChanged)
                .await
                .map_err(|e| TestCaseError::fail(format!("invalidate: {e}")))?;
            model.live = false;
        },
        Op::AdvanceAndSweep(minutes) => {
            f.clock.advance(ChronoDuration::minutes(*minutes));
            f.orchestrator
                .sweep_expired()
                .await
                .map_err(|e| TestCaseError::fail(format!("sweep: {e}")))?;
            let cutoff = f.clock.now() - ChronoDuration::minutes(SWEEP_TTL_MINUTES);
            if let Some((_, created)) = &model.current
                && *created < cutoff
            {
                model.live = false;
            }
        },
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any sequence of flows leaves at most one active session, and exactly
    /// the one the model expects.
    #[test]
    fn random_flows_keep_single_active_session(ops in prop::collection::vec(arb_op(), 1..16)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        rt.block_on(async {
            let config = SessionConfig::builder()
                .session_ttl(Duration::from_secs(60 * SWEEP_TTL_MINUTES as u64))
                .build()
                .expect("config");
            let f = Fixture::with_config(config).await;
            let user = f.add_user(IDENTITY, "u-a");
            let mut model = Model::default();

            for op in &ops {
                apply(&f, &mut model, op).await?;
                let count = f.orchestrator.count_active_sessions(&user).await.expect("count");
                prop_assert!(count <= 1, "{count} active sessions after {op:?}");
                prop_assert_eq!(count, usize::from(model.live), "after {:?}", op);
            }
            Ok(())
        })?;
    }
}
