//! Fixture shared by the integration suites.
#![allow(dead_code, clippy::expect_used)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokenward_session::{MemoryUserDirectory, SessionConfig, SessionOrchestrator, UserAccount};
use tokenward_storage::{
    ActiveSession, InvalidationReason, InvalidationRecord, MemorySessionStore, SessionId,
    SessionRecord, SessionStore, StorageResult, UserId,
    session::audit::{AuditEvent, AuditLogger},
    testutil::ManualClock,
};

pub const PASSWORD: &str = "correct horse battery staple";

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub store: MemorySessionStore,
    pub directory: MemoryUserDirectory,
    pub orchestrator: Arc<SessionOrchestrator>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(SessionConfig::default()).await
    }

    pub async fn with_config(config: SessionConfig) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::default());
        let store = MemorySessionStore::new();
        let directory = MemoryUserDirectory::new();
        let orchestrator = SessionOrchestrator::builder()
            .config(config)
            .store(Arc::new(store.clone()))
            .directory(Arc::new(directory.clone()))
            .clock(clock.clone())
            .build()
            .expect("valid configuration");
        orchestrator.rotate_keys().await.expect("initial rotation");
        Self { clock, store, directory, orchestrator: Arc::new(orchestrator) }
    }

    pub fn add_user(&self, identity: &str, user_id: &str) -> UserId {
        let hash = bcrypt::hash(PASSWORD, 4).expect("bcrypt hash");
        self.directory
            .insert(identity, UserAccount::builder().id(user_id).password_hash(hash).build());
        UserId::from(user_id)
    }

    pub async fn reasons_for(&self, session_id: &SessionId) -> Vec<InvalidationReason> {
        self.store
            .invalidations_for_session(session_id)
            .await
            .expect("invalidations")
            .into_iter()
            .map(|entry| entry.reason)
            .collect()
    }
}

/// Routes orchestrator logs to the test writer. `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Audit logger that keeps every event in memory.
#[derive(Default)]
pub struct RecordingLogger {
    pub events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditLogger for RecordingLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Store wrapper whose `get_session` hangs while `stalled` is set.
pub struct StallingStore {
    pub inner: MemorySessionStore,
    pub stalled: AtomicBool,
}

impl StallingStore {
    pub fn new(inner: MemorySessionStore) -> Self {
        Self { inner, stalled: AtomicBool::new(false) }
    }

    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for StallingStore {
    async fn insert_sessions(&self, records: &[SessionRecord]) -> StorageResult<()> {
        self.inner.insert_sessions(records).await
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.get_session(session_id).await
    }

    async fn sessions_for_user(&self, user_id: &UserId) -> StorageResult<Vec<SessionRecord>> {
        self.inner.sessions_for_user(user_id).await
    }

    async fn retire_if_active(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> StorageResult<SessionRecord> {
        self.inner.retire_if_active(session_id, reason, at).await
    }

    async fn active_sessions_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        self.inner.active_sessions_created_before(cutoff).await
    }

    async fn active_sessions_expired_by(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        self.inner.active_sessions_expired_by(now).await
    }

    async fn put_active_pointer(&self, pointer: &ActiveSession) -> StorageResult<()> {
        self.inner.put_active_pointer(pointer).await
    }

    async fn get_active_pointer(&self, user_id: &UserId) -> StorageResult<Option<ActiveSession>> {
        self.inner.get_active_pointer(user_id).await
    }

    async fn delete_active_pointer(&self, user_id: &UserId) -> StorageResult<bool> {
        self.inner.delete_active_pointer(user_id).await
    }

    async fn invalidations_for_session(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        self.inner.invalidations_for_session(session_id).await
    }

    async fn invalidations_for_user(
        &self,
        user_id: &UserId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        self.inner.invalidations_for_user(user_id).await
    }
}
