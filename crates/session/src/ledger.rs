//! The authoritative record of issued sessions.
//!
//! [`SessionLedger`] sits on top of a [`SessionStore`] and gives the
//! orchestrator its session vocabulary: begin a session (or a linked
//! access/refresh pair), ask whether one is active, retire one exactly
//! once, retire whatever the user currently has, and sweep old records.
//!
//! The ledger does not serialize per-user operations. Callers that
//! retire-then-create must hold the user's lock across both steps.
//!
//! ```text
//!                 begin_session_pair
//!   NoSession ───────────────────────────► Active pair (LOGIN ⇄ REFRESH)
//!                                              │
//!          retire_pair / retire_active_for_user│  both records flip to
//!   sweep_expired / retire_past_expiry        │  inactive, one
//!                                              ▼  InvalidationRecord each
//!                                           Retired
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokenward_storage::{
    ActiveSession, Clock, InvalidationReason, SessionId, SessionRecord, SessionScope, SessionStore,
    StorageError, SystemClock, UserId,
};

use crate::error::{Result, SessionError};

/// A LOGIN record and the REFRESH record minted with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPair {
    /// Record bound to the access token. The active pointer names it.
    pub access: SessionRecord,
    /// Record bound to the refresh token.
    pub refresh: SessionRecord,
}

/// Session bookkeeping over a [`SessionStore`].
#[derive(Clone)]
pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLedger").field("clock", &self.clock).finish_non_exhaustive()
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(chrono_ttl(ttl)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[bon::bon]
impl SessionLedger {
    /// Creates a ledger over `store`, using the system clock unless one is
    /// supplied.
    #[builder]
    pub fn new(store: Arc<dyn SessionStore>, clock: Option<Arc<dyn Clock>>) -> Self {
        Self { store, clock: clock.unwrap_or_else(|| Arc::new(SystemClock)) }
    }
}

impl SessionLedger {
    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Inserts a new active record.
    ///
    /// For LOGIN and REFRESH scopes the user's active pointer is upserted to
    /// name the new record. Any previous session must already have been
    /// retired by the caller.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn begin_session(
        &self,
        user_id: &UserId,
        scope: SessionScope,
        ttl: Duration,
    ) -> Result<SessionRecord> {
        let now = self.clock.now();
        let record = SessionRecord::builder()
            .user_id(user_id.clone())
            .scope(scope)
            .created_at(now)
            .expires_at(expiry(now, ttl))
            .build();
        self.store.insert_sessions(std::slice::from_ref(&record)).await?;

        if scope.tracks_active_pointer() {
            let pointer = ActiveSession::builder()
                .user_id(user_id.clone())
                .session_id(record.session_id.clone())
                .created_at(now)
                .build();
            self.store.put_active_pointer(&pointer).await?;
        }

        tracing::debug!(session_id = %record.session_id, %scope, "Began session");
        Ok(record)
    }

    /// Inserts a linked LOGIN + REFRESH pair and points the user's active
    /// pointer at the LOGIN record.
    ///
    /// `continues` is the start of the chain being refreshed; `None` marks a
    /// fresh login.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn begin_session_pair(
        &self,
        user_id: &UserId,
        access_ttl: Duration,
        refresh_ttl: Duration,
        continues: Option<DateTime<Utc>>,
    ) -> Result<SessionPair> {
        let now = self.clock.now();
        let access_id = SessionId::generate();
        let refresh_id = SessionId::generate();

        let access = SessionRecord::builder()
            .session_id(access_id.clone())
            .user_id(user_id.clone())
            .scope(SessionScope::Login)
            .created_at(now)
            .expires_at(expiry(now, access_ttl))
            .linked_session(refresh_id.clone())
            .build();
        let refresh = SessionRecord::builder()
            .session_id(refresh_id)
            .user_id(user_id.clone())
            .scope(SessionScope::Refresh)
            .created_at(now)
            .expires_at(expiry(now, refresh_ttl))
            .linked_session(access_id.clone())
            .build();
        self.store.insert_sessions(&[access.clone(), refresh.clone()]).await?;

        let pointer = ActiveSession::builder()
            .user_id(user_id.clone())
            .session_id(access_id)
            .created_at(continues.unwrap_or(now))
            .refreshed(continues.is_some())
            .maybe_refreshed_at(continues.map(|_| now))
            .build();
        self.store.put_active_pointer(&pointer).await?;

        tracing::debug!(
            access_session = %access.session_id,
            refresh_session = %refresh.session_id,
            refreshed = continues.is_some(),
            "Began session pair"
        );
        Ok(SessionPair { access, refresh })
    }

    /// Retrieves a record.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.store.get_session(session_id).await?)
    }

    /// Returns `true` if the record exists and has not been retired.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_active(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.store.get_session(session_id).await?.is_some_and(|record| record.active))
    }

    /// Retires one record and writes its invalidation entry.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyInactive`] if the record was already retired
    /// - [`SessionError::Storage`] with `NotFound` for an unknown id
    #[tracing::instrument(skip(self), fields(session_id = %session_id, %reason))]
    pub async fn retire(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
    ) -> Result<SessionRecord> {
        let now = self.clock.now();
        match self.store.retire_if_active(session_id, reason, now).await {
            Ok(record) => {
                tracing::debug!(user_id = %record.user_id, "Retired session");
                Ok(record)
            },
            Err(StorageError::Conflict) => {
                Err(SessionError::AlreadyInactive { session_id: session_id.clone() })
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Retires a record together with its linked half.
    ///
    /// The named record must be active. The linked record is retired if it
    /// still is; one that the sweep already retired is skipped. Returns the
    /// records retired by this call, the named one first.
    ///
    /// # Errors
    ///
    /// Same as [`retire`](Self::retire) for the named record.
    pub async fn retire_pair(
        &self,
        session_id: &SessionId,
        reason: InvalidationReason,
    ) -> Result<Vec<SessionRecord>> {
        let primary = self.retire(session_id, reason).await?;
        let mut retired = Vec::with_capacity(2);

        if let Some(linked) = primary.linked_session.clone() {
            match self.retire(&linked, reason).await {
                Ok(record) => retired.push(record),
                Err(SessionError::AlreadyInactive { .. }) => {
                    tracing::debug!(linked_session = %linked, "Linked session already retired");
                },
                Err(SessionError::Storage(StorageError::NotFound { .. })) => {
                    tracing::warn!(linked_session = %linked, "Linked session record is missing");
                },
                Err(e) => return Err(e),
            }
        }

        retired.insert(0, primary);
        Ok(retired)
    }

    /// Retires the user's most recent active LOGIN or REFRESH record and its
    /// linked half.
    ///
    /// Returns the retired record, or `None` if the user had no active
    /// session.
    ///
    /// # Errors
    ///
    /// Propagates storage failures. A record retired concurrently by the
    /// sweep is treated as already gone and yields `None`.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, %reason))]
    pub async fn retire_active_for_user(
        &self,
        user_id: &UserId,
        reason: InvalidationReason,
    ) -> Result<Option<SessionRecord>> {
        let records = self.store.sessions_for_user(user_id).await?;
        let Some(latest) = records
            .into_iter()
            .filter(|record| record.active && record.scope.tracks_active_pointer())
            .max_by_key(|record| (record.created_at, record.scope == SessionScope::Login))
        else {
            return Ok(None);
        };

        match self.retire_pair(&latest.session_id, reason).await {
            Ok(mut retired) => Ok(Some(retired.swap_remove(0))),
            Err(SessionError::AlreadyInactive { session_id }) => {
                tracing::debug!(%session_id, "Session retired concurrently");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Retires every active record created strictly before `before` with
    /// reason `EXPIRED`.
    ///
    /// Records retired concurrently by another path are skipped, so running
    /// the sweep twice never writes a second invalidation entry.
    ///
    /// # Errors
    ///
    /// Propagates storage failures other than a lost retirement race.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, before: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let candidates = self.store.active_sessions_created_before(before).await?;
        let mut retired = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.retire(&candidate.session_id, InvalidationReason::Expired).await {
                Ok(record) => retired.push(record),
                Err(SessionError::AlreadyInactive { .. }) => {},
                Err(e) => return Err(e),
            }
        }

        if !retired.is_empty() {
            tracing::info!(count = retired.len(), "Swept expired sessions");
        }
        Ok(retired)
    }

    /// Retires every active record whose own `expires_at` is at or before
    /// `now` with reason `EXPIRED`.
    ///
    /// A pair lives as long as its REFRESH record: an expired LOGIN record
    /// whose refresh half is still live is left alone, and an expired
    /// REFRESH record takes its LOGIN half with it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures other than a lost retirement race.
    #[tracing::instrument(skip(self))]
    pub async fn retire_past_expiry(&self, now: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let candidates = self.store.active_sessions_expired_by(now).await?;
        let mut retired = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if candidate.scope == SessionScope::Login
                && let Some(linked) = &candidate.linked_session
                && let Some(refresh) = self.store.get_session(linked).await?
                && refresh.active
                && refresh.expires_at > now
            {
                continue;
            }

            match self.retire_pair(&candidate.session_id, InvalidationReason::Expired).await {
                Ok(records) => retired.extend(records),
                Err(SessionError::AlreadyInactive { .. }) => {},
                Err(e) => return Err(e),
            }
        }

        if !retired.is_empty() {
            tracing::info!(count = retired.len(), "Retired sessions past expiry");
        }
        Ok(retired)
    }

    /// Reads the user's active pointer.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn active_session(&self, user_id: &UserId) -> Result<Option<ActiveSession>> {
        Ok(self.store.get_active_pointer(user_id).await?)
    }

    /// Removes the user's active pointer. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_active_pointer(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.store.delete_active_pointer(user_id).await?)
    }

    /// Counts the user's active LOGIN records.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn count_active_sessions(&self, user_id: &UserId) -> Result<usize> {
        let records = self.store.sessions_for_user(user_id).await?;
        Ok(records
            .iter()
            .filter(|record| record.active && record.scope == SessionScope::Login)
            .count())
    }
}
