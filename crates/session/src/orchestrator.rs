//! Login, refresh, logoff and forced-invalidation flows.
//!
//! # State machine (per user)
//!
//! ```text
//!              login                      refresh
//!  NoSession ─────────► ActiveSession ◄──────────┐
//!      ▲                   │    │                │
//!      │    logoff /       │    └────────────────┘
//!      └── invalidate ─────┘   (old pair retired REFRESHED,
//!         (pair retired,         new pair linked to the chain)
//!          pointer removed)
//! ```
//!
//! Every flow that retires and then creates sessions for a user holds that
//! user's lock stripe across both steps, so two concurrent logins (or a
//! login racing a refresh) can never both observe "no active session".
//! Retirement always happens before creation: a brief window with zero
//! active sessions is possible, a window with two is not.

use std::{fmt, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use fail::fail_point;
use tokenward_authn::{
    AuthError, IssueRequest, IssuedToken, KeyAuthority, PublishedKeySet, SessionClaims, TokenCodec,
};
use tokenward_storage::{
    ActiveSession, Clock, InvalidationReason, KeyId, SessionId, SessionRecord, SessionScope,
    SessionStore, StorageError, SystemClock, UserId,
    session::{audit::AuditLogger, audited_store::AuditedSessionStore},
};
use zeroize::Zeroizing;

use crate::{
    config::SessionConfig,
    directory::{BcryptPasswordVerifier, PasswordVerifier, UserAccount, UserDirectory},
    error::{Result, SessionError},
    ledger::{SessionLedger, SessionPair},
    locks::UserLocks,
    metrics::SessionMetrics,
    tasks::BackgroundTasks,
};

/// Actor name recorded on audit events emitted by the orchestrator's store.
const AUDIT_ACTOR: &str = "session-orchestrator";

/// Access and refresh tokens returned by login and refresh.
#[derive(Clone)]
pub struct TokenPair {
    /// LOGIN-scoped token for API calls.
    pub access_token: String,
    /// REFRESH-scoped token, exchangeable once.
    pub refresh_token: String,
    /// Session record bound to the access token.
    pub session_id: SessionId,
    /// Session record bound to the refresh token.
    pub refresh_session_id: SessionId,
    /// When the access token stops verifying.
    pub access_expires_at: DateTime<Utc>,
    /// When the refresh token stops verifying.
    pub refresh_expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("session_id", &self.session_id)
            .field("refresh_session_id", &self.refresh_session_id)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Maps rejections of a single-use token to the caller-facing error.
///
/// Expiry and wrong scope read as "expired or used"; signature and format
/// failures keep their own kind.
fn single_use_rejection(err: AuthError) -> SessionError {
    match err {
        AuthError::TokenExpired | AuthError::ScopeMismatch { .. } => {
            SessionError::ExpiredRefreshToken
        },
        other => other.into(),
    }
}

/// The session use-case layer.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tokenward_session::{MemoryUserDirectory, SessionConfig, SessionOrchestrator};
/// use tokenward_storage::MemorySessionStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Arc::new(
///     SessionOrchestrator::builder()
///         .config(SessionConfig::default())
///         .store(Arc::new(MemorySessionStore::new()))
///         .directory(Arc::new(MemoryUserDirectory::new()))
///         .build()?,
/// );
/// let tasks = orchestrator.start().await?;
///
/// let tokens = orchestrator.login("alice@example.com", "hunter2").await?;
/// let claims = orchestrator.verify(&tokens.access_token)?;
/// orchestrator.logoff(&tokens.access_token).await?;
///
/// tasks.shutdown().await;
/// # let _ = claims;
/// # Ok(())
/// # }
/// ```
pub struct SessionOrchestrator {
    config: SessionConfig,
    keys: Arc<KeyAuthority>,
    codec: TokenCodec,
    ledger: SessionLedger,
    directory: Arc<dyn UserDirectory>,
    passwords: Arc<dyn PasswordVerifier>,
    locks: UserLocks,
    clock: Arc<dyn Clock>,
    metrics: SessionMetrics,
}

#[bon::bon]
impl SessionOrchestrator {
    /// Wires the orchestrator together.
    ///
    /// When an `audit_logger` is given, session store mutations and key
    /// lifecycle events are both reported to it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        #[builder(default)] config: SessionConfig,
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn UserDirectory>,
        password_verifier: Option<Arc<dyn PasswordVerifier>>,
        clock: Option<Arc<dyn Clock>>,
        audit_logger: Option<Arc<dyn AuditLogger>>,
    ) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn SessionStore> = match &audit_logger {
            Some(logger) => {
                Arc::new(AuditedSessionStore::new(store, Arc::clone(logger), AUDIT_ACTOR))
            },
            None => store,
        };

        let keys = Arc::new(
            KeyAuthority::builder()
                .retention(config.key_retention())
                .clock(Arc::clone(&clock))
                .maybe_audit_logger(audit_logger)
                .build(),
        );
        let codec = TokenCodec::new(Arc::clone(&keys), config.issuer(), Arc::clone(&clock));
        let ledger = SessionLedger::builder().store(store).clock(Arc::clone(&clock)).build();

        Ok(Self {
            locks: UserLocks::new(config.lock_stripes()),
            config,
            keys,
            codec,
            ledger,
            directory,
            passwords: password_verifier.unwrap_or_else(|| Arc::new(BcryptPasswordVerifier)),
            clock,
            metrics: SessionMetrics::new(),
        })
    }
}

impl SessionOrchestrator {
    /// Performs the startup key rotation and spawns the periodic rotation
    /// and sweep tasks.
    ///
    /// # Errors
    ///
    /// Returns the rotation error if no signing key could be generated. The
    /// service must not serve in that case.
    pub async fn start(self: &Arc<Self>) -> Result<BackgroundTasks> {
        let kid = self.rotate_keys().await.inspect_err(|e| {
            tracing::error!(error = %e, "Startup key rotation failed");
        })?;
        tracing::info!(kid = %kid, "Signing key ready");
        Ok(BackgroundTasks::spawn(Arc::clone(self)))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the key authority.
    pub fn key_authority(&self) -> &Arc<KeyAuthority> {
        &self.keys
    }

    /// Returns the token codec.
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Returns the session ledger.
    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Returns the operation counters.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Authenticates a user and starts a new session, retiring any previous
    /// one with reason `NEW_LOGIN`.
    ///
    /// # Errors
    ///
    /// In check order: [`SessionError::UserNotFound`],
    /// [`SessionError::UserBlocked`], [`SessionError::DirectLoginNotAllowed`],
    /// [`SessionError::InvalidCredentials`]; then storage or key failures.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, identity: &str, password: &str) -> Result<TokenPair> {
        let result = self.login_inner(identity, password).await;
        match &result {
            Ok(tokens) => {
                self.metrics.record_login();
                tracing::info!(session_id = %tokens.session_id, "Login succeeded");
            },
            Err(e) => {
                self.metrics.record_failed_login();
                tracing::info!(error = %e, "Login rejected");
            },
        }
        result
    }

    async fn login_inner(&self, identity: &str, password: &str) -> Result<TokenPair> {
        let account = self.resolve_account(identity).await?;
        let Some(hash) = account.password_hash.filter(|hash| !hash.is_empty()) else {
            return Err(SessionError::DirectLoginNotAllowed);
        };
        if !self.check_password(password, hash).await? {
            return Err(SessionError::InvalidCredentials);
        }

        let _guard = self.locks.lock(&account.id).await;
        // Fail before retiring anything if there is nothing to sign with.
        self.keys.current_signing_key()?;

        if let Some(previous) =
            self.ledger.retire_active_for_user(&account.id, InvalidationReason::NewLogin).await?
        {
            tracing::info!(
                user_id = %account.id,
                session_id = %previous.session_id,
                "Retired previous session for new login"
            );
        }

        fail_point!("session-login-after-retire", |_| {
            Err(SessionError::internal("injected failure after retiring previous session"))
        });

        let pair = self
            .ledger
            .begin_session_pair(
                &account.id,
                self.config.access_token_ttl(),
                self.config.refresh_token_ttl(),
                None,
            )
            .await?;
        self.mint_pair(identity, &pair)
    }

    /// Exchanges a refresh token for a new pair.
    ///
    /// The presented token's pair is retired with reason `REFRESHED`, so a
    /// second exchange of the same token always fails.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ExpiredRefreshToken`] if the token is expired, not a
    ///   refresh token, or its session is no longer active (reuse)
    /// - [`SessionError::Auth`] for malformed or badly signed tokens
    /// - [`SessionError::Storage`] with `Timeout` if storage is too slow
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let result = self.refresh_inner(refresh_token).await;
        match &result {
            Ok(tokens) => {
                self.metrics.record_refresh();
                tracing::debug!(session_id = %tokens.session_id, "Refreshed session");
            },
            Err(SessionError::ExpiredRefreshToken) => self.metrics.record_reuse_rejection(),
            Err(_) => {},
        }
        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self
            .codec
            .verify_scoped(refresh_token, SessionScope::Refresh, None)
            .map_err(single_use_rejection)?;

        let _guard = self.locks.lock(&claims.uid).await;

        if !self.bounded(self.ledger.is_active(&claims.sid)).await? {
            tracing::warn!(
                user_id = %claims.uid,
                session_id = %claims.sid,
                "Rejected refresh token whose session is no longer active"
            );
            return Err(SessionError::ExpiredRefreshToken);
        }

        let retire = self.ledger.retire_pair(&claims.sid, InvalidationReason::Refreshed);
        let retired = match self.bounded(retire).await {
            Ok(retired) => retired,
            Err(SessionError::AlreadyInactive { session_id }) => {
                tracing::warn!(%session_id, "Refresh lost a race with another retirement");
                return Err(SessionError::ExpiredRefreshToken);
            },
            Err(e) => return Err(e),
        };

        let pointer = self.bounded(self.ledger.active_session(&claims.uid)).await?;
        let chain_start = pointer
            .filter(|pointer| retired.iter().any(|record| record.session_id == pointer.session_id))
            .map(|pointer| pointer.created_at)
            .or_else(|| retired.iter().map(|record| record.created_at).min());

        let pair = self
            .bounded(self.ledger.begin_session_pair(
                &claims.uid,
                self.config.access_token_ttl(),
                self.config.refresh_token_ttl(),
                chain_start,
            ))
            .await?;
        self.mint_pair(&claims.sub, &pair)
    }

    /// Ends the session a LOGIN or REFRESH token belongs to.
    ///
    /// The token's pair is retired with reason `LOGOFF` if it is still
    /// active, and the active pointer is removed if it names that pair.
    /// Logging off an already-retired session is a no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] if the token does not verify or is a recovery
    /// token; storage failures.
    #[tracing::instrument(skip_all)]
    pub async fn logoff(&self, token: &str) -> Result<()> {
        let claims = self.codec.verify(token, None)?;
        if !claims.scope.tracks_active_pointer() {
            return Err(AuthError::ScopeMismatch {
                expected: SessionScope::Login.to_string(),
                actual: claims.scope.to_string(),
            }
            .into());
        }

        let _guard = self.locks.lock(&claims.uid).await;

        let Some(record) = self.ledger.session(&claims.sid).await? else {
            tracing::warn!(session_id = %claims.sid, "Logoff for unknown session");
            return Ok(());
        };

        let mut retired = false;
        if record.active {
            match self.ledger.retire_pair(&record.session_id, InvalidationReason::Logoff).await {
                Ok(records) => {
                    tracing::debug!(count = records.len(), "Retired session pair");
                    retired = true;
                },
                Err(SessionError::AlreadyInactive { .. }) => {},
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!(session_id = %record.session_id, "Session already retired");
        }

        let pointer = self.ledger.active_session(&claims.uid).await?;
        if pointer.is_some_and(|pointer| names_pair(&pointer, &record)) {
            self.ledger.delete_active_pointer(&claims.uid).await?;
        }

        if retired {
            self.metrics.record_logoff();
            tracing::info!(user_id = %claims.uid, "Logged off");
        }
        Ok(())
    }

    /// Retires the user's active session and removes the pointer. Used by
    /// password change and reset flows.
    ///
    /// Returns the retired LOGIN (or REFRESH) record, or `None` if the user
    /// had no active session.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn invalidate_for_user(
        &self,
        user_id: &UserId,
        reason: InvalidationReason,
    ) -> Result<Option<SessionRecord>> {
        let _guard = self.locks.lock(user_id).await;
        self.invalidate_locked(user_id, reason).await
    }

    async fn invalidate_locked(
        &self,
        user_id: &UserId,
        reason: InvalidationReason,
    ) -> Result<Option<SessionRecord>> {
        let retired = self.ledger.retire_active_for_user(user_id, reason).await?;
        self.ledger.delete_active_pointer(user_id).await?;
        self.metrics.record_forced_invalidation();
        tracing::info!(
            user_id = %user_id,
            %reason,
            retired = retired.is_some(),
            "Invalidated sessions for user"
        );
        Ok(retired)
    }

    /// Verifies an access token. Stateless: the ledger is not consulted.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`], including `ScopeMismatch` for refresh and recovery
    /// tokens.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        Ok(self.codec.verify_scoped(token, SessionScope::Login, None)?)
    }

    /// Returns the public keys for the key-discovery endpoint.
    pub fn publishable_key_set(&self) -> PublishedKeySet {
        self.keys.publishable_key_set()
    }

    /// Retires every active record that is past its own expiry or older
    /// than the configured session TTL.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<Vec<SessionRecord>> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.session_ttl())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut swept = self.ledger.sweep_expired(cutoff).await?;
        swept.extend(self.ledger.retire_past_expiry(now).await?);
        self.metrics.record_swept(swept.len());
        Ok(swept)
    }

    /// Rotates the signing key and prunes keys past their retention.
    ///
    /// # Errors
    ///
    /// Returns the rotation error; the previous key stays current.
    #[tracing::instrument(skip(self))]
    pub async fn rotate_keys(&self) -> Result<KeyId> {
        let result = self.keys.rotate().await;
        self.metrics.record_rotation(result.is_ok());
        let kid = result?;

        let pruned = self.keys.prune_retired().await;
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "Pruned retired signing keys");
        }
        Ok(kid)
    }

    /// Starts a single-use password recovery session.
    ///
    /// The recovery record does not touch the active pointer; the user's
    /// current session stays valid until the token is redeemed.
    ///
    /// # Errors
    ///
    /// [`SessionError::UserNotFound`], [`SessionError::UserBlocked`], storage
    /// or key failures.
    #[tracing::instrument(skip(self))]
    pub async fn issue_recovery_token(&self, identity: &str) -> Result<IssuedToken> {
        let account = self.resolve_account(identity).await?;
        let ttl = self.config.recovery_token_ttl();

        let record = self.ledger.begin_session(&account.id, SessionScope::Recover, ttl).await?;
        let request = IssueRequest::builder()
            .user_id(account.id)
            .subject(identity)
            .session_id(record.session_id)
            .scope(SessionScope::Recover)
            .ttl(ttl)
            .build();
        Ok(self.codec.issue(&request)?)
    }

    /// Redeems a recovery token: retires it and invalidates the user's
    /// active session with reason `PASSWORD_RESET`.
    ///
    /// Returns the user whose password may now be reset.
    ///
    /// # Errors
    ///
    /// [`SessionError::ExpiredRefreshToken`] if the token is expired, of the
    /// wrong scope, or already redeemed; other token and storage failures.
    #[tracing::instrument(skip_all)]
    pub async fn redeem_recovery_token(&self, token: &str) -> Result<UserId> {
        let claims = self
            .codec
            .verify_scoped(token, SessionScope::Recover, None)
            .map_err(single_use_rejection)
            .inspect_err(|e| {
                if matches!(e, SessionError::ExpiredRefreshToken) {
                    self.metrics.record_reuse_rejection();
                }
            })?;

        let _guard = self.locks.lock(&claims.uid).await;

        match self.ledger.retire(&claims.sid, InvalidationReason::PasswordReset).await {
            Ok(_) => {},
            Err(SessionError::AlreadyInactive { .. })
            | Err(SessionError::Storage(StorageError::NotFound { .. })) => {
                self.metrics.record_reuse_rejection();
                tracing::warn!(
                    user_id = %claims.uid,
                    session_id = %claims.sid,
                    "Rejected reuse of recovery token"
                );
                return Err(SessionError::ExpiredRefreshToken);
            },
            Err(e) => return Err(e),
        }

        self.invalidate_locked(&claims.uid, InvalidationReason::PasswordReset).await?;
        Ok(claims.uid)
    }

    /// Reads the user's active pointer.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn active_session(&self, user_id: &UserId) -> Result<Option<ActiveSession>> {
        self.ledger.active_session(user_id).await
    }

    /// Counts the user's active LOGIN records. Never more than one.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn count_active_sessions(&self, user_id: &UserId) -> Result<usize> {
        self.ledger.count_active_sessions(user_id).await
    }

    async fn resolve_account(&self, identity: &str) -> Result<UserAccount> {
        let account = self
            .directory
            .find_user_by_identity(identity)
            .await?
            .ok_or(SessionError::UserNotFound)?;
        if account.blocked {
            return Err(SessionError::UserBlocked);
        }
        Ok(account)
    }

    async fn check_password(&self, password: &str, hash: String) -> Result<bool> {
        let verifier = Arc::clone(&self.passwords);
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || verifier.verify(&password, &hash))
            .await
            .map_err(|e| SessionError::internal(format!("password verification task failed: {e}")))
    }

    /// Runs a storage call under the configured timeout. A timeout fails
    /// the request.
    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.storage_timeout(), operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.config.storage_timeout(),
                    "Storage call timed out"
                );
                Err(StorageError::timeout().into())
            },
        }
    }

    fn mint_pair(&self, subject: &str, pair: &SessionPair) -> Result<TokenPair> {
        let access = self.codec.issue(
            &IssueRequest::builder()
                .user_id(pair.access.user_id.clone())
                .subject(subject)
                .session_id(pair.access.session_id.clone())
                .scope(SessionScope::Login)
                .ttl(self.config.access_token_ttl())
                .build(),
        )?;
        let refresh = self.codec.issue(
            &IssueRequest::builder()
                .user_id(pair.refresh.user_id.clone())
                .subject(subject)
                .session_id(pair.refresh.session_id.clone())
                .scope(SessionScope::Refresh)
                .ttl(self.config.refresh_token_ttl())
                .build(),
        )?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            session_id: pair.access.session_id.clone(),
            refresh_session_id: pair.refresh.session_id.clone(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }
}

fn names_pair(pointer: &ActiveSession, record: &SessionRecord) -> bool {
    pointer.session_id == record.session_id
        || record.linked_session.as_ref().is_some_and(|linked| *linked == pointer.session_id)
}

impl fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
