//! Session records, active-session pointers and invalidation entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionId, UserId};

/// What an issued token may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionScope {
    /// Access token for authenticated API calls.
    Login,
    /// Refresh token, exchangeable once for a new pair.
    Refresh,
    /// Single-use password recovery token.
    Recover,
}

impl SessionScope {
    /// Returns `true` for scopes that own the user's active-session pointer.
    #[must_use]
    pub fn tracks_active_pointer(self) -> bool {
        matches!(self, Self::Login | Self::Refresh)
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "LOGIN"),
            Self::Refresh => write!(f, "REFRESH"),
            Self::Recover => write!(f, "RECOVER"),
        }
    }
}

/// Why a session record was retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationReason {
    /// Retired by the periodic sweep after its lifetime elapsed.
    Expired,
    /// Exchanged for a new pair by a refresh.
    #[serde(alias = "USER_REFRESH")]
    Refreshed,
    /// The user logged off.
    #[serde(alias = "LOG_OFF")]
    Logoff,
    /// Replaced by a newer login.
    NewLogin,
    /// The user changed their password.
    PasswordChanged,
    /// The user's password was reset.
    PasswordReset,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "EXPIRED"),
            Self::Refreshed => write!(f, "REFRESHED"),
            Self::Logoff => write!(f, "LOGOFF"),
            Self::NewLogin => write!(f, "NEW_LOGIN"),
            Self::PasswordChanged => write!(f, "PASSWORD_CHANGED"),
            Self::PasswordReset => write!(f, "PASSWORD_RESET"),
        }
    }
}

/// One issued token's identity and liveness.
///
/// Records are created active and flip to inactive exactly once. They are
/// never deleted; together with [`InvalidationRecord`]s they form the audit
/// trail of a user's sessions.
///
/// The access and refresh records minted for one login event point at each
/// other through `linked_session` and are retired together.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use tokenward_storage::{SessionRecord, SessionScope};
///
/// let now = Utc::now();
/// let record = SessionRecord::builder()
///     .user_id("u-1")
///     .scope(SessionScope::Login)
///     .created_at(now)
///     .expires_at(now + Duration::minutes(15))
///     .build();
///
/// assert!(record.active);
/// assert!(record.linked_session.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct SessionRecord {
    /// Unique id, embedded in the token as `sid` and `jti`.
    #[builder(default = SessionId::generate(), into)]
    pub session_id: SessionId,

    /// Owner of the session.
    #[builder(into)]
    pub user_id: UserId,

    /// Purpose of the token bound to this record.
    pub scope: SessionScope,

    /// When the record was issued.
    pub created_at: DateTime<Utc>,

    /// When the bound token stops verifying.
    pub expires_at: DateTime<Utc>,

    /// `false` once retired.
    #[builder(default = true)]
    pub active: bool,

    /// The other half of an access/refresh pair.
    #[builder(into)]
    pub linked_session: Option<SessionId>,
}

/// The single session currently authoritative for a user.
///
/// `session_id` names the LOGIN record of the current pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct ActiveSession {
    /// The user this pointer belongs to. At most one pointer per user.
    #[builder(into)]
    pub user_id: UserId,

    /// LOGIN record of the current pair.
    #[builder(into)]
    pub session_id: SessionId,

    /// When the chain of sessions started (the original login).
    pub created_at: DateTime<Utc>,

    /// Whether the chain has been refreshed at least once.
    #[builder(default)]
    pub refreshed: bool,

    /// Time of the most recent refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Append-only audit entry written whenever a record is retired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRecord {
    /// Owner of the retired session.
    pub user_id: UserId,
    /// The retired session.
    pub session_id: SessionId,
    /// When the retirement happened.
    pub invalidated_at: DateTime<Utc>,
    /// Why it happened.
    pub reason: InvalidationReason,
}
