//! Audit-logging decorator for [`SessionStore`] implementations.
//!
//! Wraps any session store and emits an [`AuditEvent`] for every mutation,
//! without modifying the underlying store. Reads pass through unaudited.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    audit::{
        AuditAction, AuditEvent, AuditLogger, AuditResult, pointer_resource, session_resource,
    },
    record::{ActiveSession, InvalidationReason, InvalidationRecord, SessionRecord},
    store::SessionStore,
};
use crate::{
    error::StorageResult,
    types::{SessionId, UserId},
};

/// Decorator that adds audit logging to any [`SessionStore`].
///
/// # Usage
///
/// ```no_run
/// use tokenward_storage::MemorySessionStore;
/// use tokenward_storage::session::audit::TracingAuditLogger;
/// use tokenward_storage::session::audited_store::AuditedSessionStore;
///
/// let store = MemorySessionStore::new();
/// let audited = AuditedSessionStore::new(store, TracingAuditLogger, "session-ledger");
/// ```
pub struct AuditedSessionStore<S, L> {
    inner: S,
    logger: L,
    actor: Arc<str>,
}

impl<S, L> AuditedSessionStore<S, L>
where
    S: SessionStore,
    L: AuditLogger,
{
    /// Creates a new audited store wrapping the given store and logger.
    pub fn new(inner: S, logger: L, actor: impl Into<Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// Returns a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn emit(
        &self,
        action: AuditAction,
        resource: String,
        result: AuditResult,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.logger.log(&event).await;
    }

    fn result_from<T>(res: &StorageResult<T>) -> AuditResult {
        match res {
            Ok(_) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        }
    }
}

#[async_trait]
impl<S, L> SessionStore for AuditedSessionStore<S, L>
where
    S: SessionStore,
    L: AuditLogger,
{
    async fn insert_sessions(&self, records: &[SessionRecord]) -> StorageResult<()> {
        let res = self.inner.insert_sessions(records).await;
        let audit_result = Self::result_from(&res);
        for record in records {
            let mut metadata = HashMap::new();
            metadata.insert("scope".to_owned(), record.scope.to_string());
            self.emit(
                AuditAction::BeginSession,
                session_resource(&record.user_id, &record.session_id),
                audit_result.clone(),
                metadata,
            )
            .await;
        }
        res
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
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
        let res = self.inner.retire_if_active(session_id, reason, at).await;
        let audit_result = Self::result_from(&res);
        let resource = match &res {
            Ok(record) => session_resource(&record.user_id, session_id),
            Err(_) => session_resource("?", session_id),
        };
        let mut metadata = HashMap::new();
        metadata.insert("reason".to_owned(), reason.to_string());
        self.emit(AuditAction::RetireSession, resource, audit_result, metadata).await;
        res
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
        let res = self.inner.put_active_pointer(pointer).await;
        let audit_result = Self::result_from(&res);
        let mut metadata = HashMap::new();
        metadata.insert("session_id".to_owned(), pointer.session_id.to_string());
        metadata.insert("refreshed".to_owned(), pointer.refreshed.to_string());
        self.emit(
            AuditAction::SetActivePointer,
            pointer_resource(&pointer.user_id),
            audit_result,
            metadata,
        )
        .await;
        res
    }

    async fn get_active_pointer(&self, user_id: &UserId) -> StorageResult<Option<ActiveSession>> {
        self.inner.get_active_pointer(user_id).await
    }

    async fn delete_active_pointer(&self, user_id: &UserId) -> StorageResult<bool> {
        let res = self.inner.delete_active_pointer(user_id).await;
        let audit_result = Self::result_from(&res);
        let mut metadata = HashMap::new();
        if let Ok(existed) = &res {
            metadata.insert("existed".to_owned(), existed.to_string());
        }
        self.emit(AuditAction::DeleteActivePointer, pointer_resource(user_id), audit_result, metadata)
            .await;
        res
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
