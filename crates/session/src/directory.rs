//! Seams to the user directory and the password hasher.
//!
//! Account management lives outside this crate. The orchestrator only
//! needs to resolve an identity to an account and check a password
//! against a stored hash.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokenward_storage::{StorageResult, UserId};

/// The slice of a user account the login flow reads.
#[derive(Clone, PartialEq, Eq, bon::Builder)]
pub struct UserAccount {
    /// Stable user id.
    #[builder(into)]
    pub id: UserId,

    /// Stored password hash. `None` for accounts without a password
    /// credential, such as OAuth-only accounts.
    #[builder(into)]
    pub password_hash: Option<String>,

    /// Blocked accounts cannot log in or recover.
    #[builder(default)]
    pub blocked: bool,
}

impl fmt::Debug for UserAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAccount")
            .field("id", &self.id)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "[REDACTED]"))
            .field("blocked", &self.blocked)
            .finish()
    }
}

/// Resolves login identities (e.g. email addresses) to accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up the account for `identity`.
    async fn find_user_by_identity(&self, identity: &str) -> StorageResult<Option<UserAccount>>;
}

#[async_trait]
impl<D: UserDirectory + ?Sized> UserDirectory for Arc<D> {
    async fn find_user_by_identity(&self, identity: &str) -> StorageResult<Option<UserAccount>> {
        (**self).find_user_by_identity(identity).await
    }
}

/// Checks a plaintext password against a stored hash.
///
/// Implementations are CPU-bound; the orchestrator calls them on the
/// blocking pool.
pub trait PasswordVerifier: Send + Sync {
    /// Returns `true` if `plaintext` matches `hash`.
    ///
    /// An unparseable hash is a mismatch, never a match.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// [`PasswordVerifier`] for bcrypt hashes (`$2a$`, `$2b$`, `$2y$`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BcryptPasswordVerifier;

impl PasswordVerifier for BcryptPasswordVerifier {
    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        match bcrypt::verify(plaintext, hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                false
            },
        }
    }
}

/// In-memory [`UserDirectory`] keyed by identity.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, UserAccount>>>,
}

impl MemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the account for `identity`.
    pub fn insert(&self, identity: impl Into<String>, account: UserAccount) {
        self.users.write().insert(identity.into(), account);
    }

    /// Sets the blocked flag. Returns `false` if the identity is unknown.
    pub fn set_blocked(&self, identity: &str, blocked: bool) -> bool {
        match self.users.write().get_mut(identity) {
            Some(account) => {
                account.blocked = blocked;
                true
            },
            None => false,
        }
    }

    /// Replaces the stored password hash. Returns `false` if the identity is
    /// unknown.
    pub fn set_password_hash(&self, identity: &str, hash: Option<String>) -> bool {
        match self.users.write().get_mut(identity) {
            Some(account) => {
                account.password_hash = hash;
                true
            },
            None => false,
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user_by_identity(&self, identity: &str) -> StorageResult<Option<UserAccount>> {
        Ok(self.users.read().get(identity).cloned())
    }
}
