//! Shared test utilities for session orchestration.
//!
//! [`Harness`] wires an orchestrator to an in-memory store, an in-memory
//! user directory and a [`ManualClock`]. Feature-gated behind `testutil`.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tokenward_session::testutil::{Harness, TEST_PASSWORD};
//!
//! # async fn example() {
//! let h = Harness::new().await;
//! h.add_user("alice@example.com", "u-1");
//! let tokens = h.orchestrator.login("alice@example.com", TEST_PASSWORD).await.unwrap();
//! # let _ = tokens;
//! # }
//! ```

use std::sync::Arc;

use tokenward_storage::{MemorySessionStore, UserId, testutil::ManualClock};

use crate::{
    config::SessionConfig,
    directory::{MemoryUserDirectory, UserAccount},
    orchestrator::SessionOrchestrator,
};

/// Password every [`Harness::add_user`] account is created with.
pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Hashes `plaintext` with the cheapest bcrypt cost.
///
/// # Panics
///
/// Panics if bcrypt rejects the input.
#[must_use]
pub fn hash_password(plaintext: &str) -> String {
    bcrypt::hash(plaintext, 4).expect("bcrypt hash")
}

/// An orchestrator over in-memory collaborators with a manual clock.
pub struct Harness {
    /// Time source shared by keys, ledger and tokens.
    pub clock: Arc<ManualClock>,
    /// The store behind the ledger.
    pub store: MemorySessionStore,
    /// The user directory.
    pub directory: MemoryUserDirectory,
    /// The orchestrator under test.
    pub orchestrator: Arc<SessionOrchestrator>,
}

impl Harness {
    /// Default configuration, with one signing key already generated.
    pub async fn new() -> Self {
        Self::with_config(SessionConfig::default()).await
    }

    /// Custom configuration, with one signing key already generated.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid or rotation fails.
    pub async fn with_config(config: SessionConfig) -> Self {
        let harness = Self::build(config);
        harness.orchestrator.rotate_keys().await.expect("initial rotation");
        harness
    }

    /// Default configuration and no signing key yet.
    pub async fn without_keys() -> Self {
        Self::build(SessionConfig::default())
    }

    fn build(config: SessionConfig) -> Self {
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
        Self { clock, store, directory, orchestrator: Arc::new(orchestrator) }
    }

    /// Registers an account with [`TEST_PASSWORD`] and returns its id.
    pub fn add_user(&self, identity: &str, user_id: &str) -> UserId {
        let account = UserAccount::builder()
            .id(user_id)
            .password_hash(hash_password(TEST_PASSWORD))
            .build();
        self.directory.insert(identity, account);
        UserId::from(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_has_key_and_user() {
        let h = Harness::new().await;
        assert!(h.orchestrator.key_authority().current_signing_key().is_ok());

        let user = h.add_user("alice@example.com", "u-1");
        assert_eq!(user.as_str(), "u-1");
        assert!(h.orchestrator.login("alice@example.com", TEST_PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn test_without_keys_has_no_key() {
        let h = Harness::without_keys().await;
        assert!(h.orchestrator.key_authority().current_signing_key().is_err());
    }
}
