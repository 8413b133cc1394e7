//! Error types for session orchestration.

use tokenward_authn::AuthError;
use tokenward_storage::{SessionId, StorageError};

/// Errors returned by the session ledger and orchestrator.
///
/// The user-facing variants are distinct so a boundary layer can map each
/// one to its own response. Token and key failures arrive wrapped as
/// [`SessionError::Auth`], persistence failures as [`SessionError::Storage`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// No account matches the presented identity.
    #[error("User not found")]
    UserNotFound,

    /// The account is blocked.
    #[error("User is blocked")]
    UserBlocked,

    /// The account has no password credential (e.g. OAuth-only).
    #[error("Direct login is not allowed for this account")]
    DirectLoginNotAllowed,

    /// The password did not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The refresh or recovery token is expired, unknown, or already used.
    #[error("Refresh token is expired or has already been used")]
    ExpiredRefreshToken,

    /// A session record was retired twice.
    ///
    /// Orchestration never surfaces this under correct operation; seeing it
    /// indicates a bug.
    #[error("Session {session_id} is already inactive")]
    AlreadyInactive {
        /// The record that was already retired.
        session_id: SessionId,
    },

    /// Token or signing key failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unexpected internal failure (e.g. a panicked blocking task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Creates a [`SessionError::Config`].
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a [`SessionError::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` for failures caused by what the caller presented
    /// (identity, password, or token) rather than by the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::UserNotFound
            | Self::UserBlocked
            | Self::DirectLoginNotAllowed
            | Self::InvalidCredentials
            | Self::ExpiredRefreshToken => true,
            Self::Auth(e) => e.is_token_rejection(),
            _ => false,
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
