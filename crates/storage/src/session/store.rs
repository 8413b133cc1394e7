//! Storage trait for session records, active-session pointers and the
//! invalidation log.
//!
//! # Record Lifecycle
//!
//! ```text
//! ┌─────────────┐  retire_if_active   ┌─────────────┐
//! │   Active    │────────────────────►│  Inactive   │
//! │             │   (exactly once,    │ (permanent) │
//! │             │  + 1 invalidation)  │             │
//! └─────────────┘                     └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use chrono::Utc;
//! use tokenward_storage::{InvalidationReason, SessionId, SessionStore, StorageResult};
//!
//! async fn log_off<S: SessionStore>(store: &S, session_id: &SessionId) -> StorageResult<()> {
//!     store.retire_if_active(session_id, InvalidationReason::Logoff, Utc::now()).await?;
//!     Ok(())
//! }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::record::{ActiveSession, InvalidationReason, InvalidationRecord, SessionRecord};
use crate::{
    error::{StorageError, StorageResult},
    types::{SessionId, UserId},
};

/// Persistence for the three session tables.
///
/// The store is the single source of truth for session liveness. Its one
/// hard requirement is that [`retire_if_active`](Self::retire_if_active)
/// is a compare-and-swap: the check of the `active` flag, the flip, and the
/// append of the invalidation entry happen as one operation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts new session records as one write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if any id already exists or appears
    /// twice in `records`; in that case none of the records are stored.
    async fn insert_sessions(&self, records: &[SessionRecord]) -> StorageResult<()>;

    /// Retrieves a session record by id.
    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>>;

    /// Lists a user's session records in insertion order.
    async fn sessions_for_user(&self, user_id: &UserId) -> StorageResult<Vec<SessionRecord>>;

    /// Marks a record inactive and appends its invalidation entry, if and
    /// only if it is still active.
    ///
    /// Returns the record as it is after retirement.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record has this id
    /// - [`StorageError::Conflict`] if the record is already inactive
    async fn retire_if_active(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> StorageResult<SessionRecord>;

    /// Retires several records, one result per input in the same order.
    ///
    /// The default implementation calls
    /// [`retire_if_active`](Self::retire_if_active) sequentially.
    async fn retire_many(
        &self,
        session_ids: &[SessionId],
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> Vec<StorageResult<SessionRecord>> {
        let mut results = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            results.push(self.retire_if_active(session_id, reason, at).await);
        }
        results
    }

    /// Lists active records created strictly before `cutoff`.
    async fn active_sessions_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>>;

    /// Lists active records whose `expires_at` is at or before `now`.
    async fn active_sessions_expired_by(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>>;

    /// Creates or replaces the user's active-session pointer.
    async fn put_active_pointer(&self, pointer: &ActiveSession) -> StorageResult<()>;

    /// Reads the user's active-session pointer.
    async fn get_active_pointer(&self, user_id: &UserId) -> StorageResult<Option<ActiveSession>>;

    /// Removes the user's active-session pointer. Returns whether one existed.
    async fn delete_active_pointer(&self, user_id: &UserId) -> StorageResult<bool>;

    /// Lists invalidation entries for one session.
    async fn invalidations_for_session(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<InvalidationRecord>>;

    /// Lists invalidation entries for one user, oldest first.
    async fn invalidations_for_user(
        &self,
        user_id: &UserId,
    ) -> StorageResult<Vec<InvalidationRecord>>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn insert_sessions(&self, records: &[SessionRecord]) -> StorageResult<()> {
        (**self).insert_sessions(records).await
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        (**self).get_session(session_id).await
    }

    async fn sessions_for_user(&self, user_id: &UserId) -> StorageResult<Vec<SessionRecord>> {
        (**self).sessions_for_user(user_id).await
    }

    async fn retire_if_active(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> StorageResult<SessionRecord> {
        (**self).retire_if_active(session_id, reason, at).await
    }

    async fn retire_many(
        &self,
        session_ids: &[SessionId],
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> Vec<StorageResult<SessionRecord>> {
        (**self).retire_many(session_ids, reason, at).await
    }

    async fn active_sessions_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        (**self).active_sessions_created_before(cutoff).await
    }

    async fn active_sessions_expired_by(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        (**self).active_sessions_expired_by(now).await
    }

    async fn put_active_pointer(&self, pointer: &ActiveSession) -> StorageResult<()> {
        (**self).put_active_pointer(pointer).await
    }

    async fn get_active_pointer(&self, user_id: &UserId) -> StorageResult<Option<ActiveSession>> {
        (**self).get_active_pointer(user_id).await
    }

    async fn delete_active_pointer(&self, user_id: &UserId) -> StorageResult<bool> {
        (**self).delete_active_pointer(user_id).await
    }

    async fn invalidations_for_session(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        (**self).invalidations_for_session(session_id).await
    }

    async fn invalidations_for_user(
        &self,
        user_id: &UserId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        (**self).invalidations_for_user(user_id).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<SessionId, SessionRecord>,
    /// Session ids per user, in insertion order.
    by_user: HashMap<UserId, Vec<SessionId>>,
    pointers: HashMap<UserId, ActiveSession>,
    invalidations: Vec<InvalidationRecord>,
}

/// In-memory implementation of [`SessionStore`].
///
/// All three tables live behind one [`parking_lot::RwLock`], so every
/// method is atomic with respect to every other. Clones share state.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use tokenward_storage::{
///     InvalidationReason, MemorySessionStore, SessionRecord, SessionScope, SessionStore,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemorySessionStore::new();
///     let now = Utc::now();
///     let record = SessionRecord::builder()
///         .user_id("u-1")
///         .scope(SessionScope::Login)
///         .created_at(now)
///         .expires_at(now + Duration::minutes(15))
///         .build();
///
///     store.insert_sessions(&[record.clone()]).await?;
///     let retired =
///         store.retire_if_active(&record.session_id, InvalidationReason::Logoff, now).await?;
///     assert!(!retired.active);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemorySessionStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    async fn insert_sessions(&self, records: &[SessionRecord]) -> StorageResult<()> {
        let mut tables = self.tables.write();

        // Validate every id before mutating
        let mut batch = HashSet::with_capacity(records.len());
        for record in records {
            if tables.sessions.contains_key(&record.session_id) || !batch.insert(&record.session_id)
            {
                return Err(StorageError::conflict());
            }
        }

        for record in records {
            tables
                .by_user
                .entry(record.user_id.clone())
                .or_default()
                .push(record.session_id.clone());
            tables.sessions.insert(record.session_id.clone(), record.clone());
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        Ok(self.tables.read().sessions.get(session_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn sessions_for_user(&self, user_id: &UserId) -> StorageResult<Vec<SessionRecord>> {
        let tables = self.tables.read();
        let records: Vec<SessionRecord> = tables
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| tables.sessions.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(records)
    }

    /// Check, flip and append all happen under a single write lock.
    #[tracing::instrument(skip(self))]
    async fn retire_if_active(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
        at: DateTime<Utc>,
    ) -> StorageResult<SessionRecord> {
        let mut tables = self.tables.write();

        let record = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::not_found(session_id.as_str()))?;
        if !record.active {
            return Err(StorageError::conflict());
        }
        record.active = false;
        let retired = record.clone();

        tables.invalidations.push(InvalidationRecord {
            user_id: retired.user_id.clone(),
            session_id: retired.session_id.clone(),
            invalidated_at: at,
            reason,
        });
        Ok(retired)
    }

    #[tracing::instrument(skip(self))]
    async fn active_sessions_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        let tables = self.tables.read();
        let mut records: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|record| record.active && record.created_at < cutoff)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn active_sessions_expired_by(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionRecord>> {
        let tables = self.tables.read();
        let mut records: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|record| record.active && record.expires_at <= now)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(records)
    }

    #[tracing::instrument(skip(self, pointer), fields(user_id = %pointer.user_id))]
    async fn put_active_pointer(&self, pointer: &ActiveSession) -> StorageResult<()> {
        self.tables.write().pointers.insert(pointer.user_id.clone(), pointer.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_active_pointer(&self, user_id: &UserId) -> StorageResult<Option<ActiveSession>> {
        Ok(self.tables.read().pointers.get(user_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_active_pointer(&self, user_id: &UserId) -> StorageResult<bool> {
        Ok(self.tables.write().pointers.remove(user_id).is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn invalidations_for_session(
        &self,
        session_id: &SessionId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .invalidations
            .iter()
            .filter(|entry| &entry.session_id == session_id)
            .cloned()
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn invalidations_for_user(
        &self,
        user_id: &UserId,
    ) -> StorageResult<Vec<InvalidationRecord>> {
        let tables = self.tables.read();
        Ok(tables.invalidations.iter().filter(|entry| &entry.user_id == user_id).cloned().collect())
    }
}
