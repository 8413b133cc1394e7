//! Session lifecycle orchestration with a single active session per user.
//!
//! This crate composes the key authority and token codec from
//! `tokenward-authn` with the session store from `tokenward-storage` into
//! the login, refresh, logoff and forced-invalidation flows.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  SessionOrchestrator                     │
//! │   login · refresh · logoff · invalidate_for_user         │
//! │   verify · publishable_key_set · recovery tokens         │
//! ├──────────────┬───────────────┬──────────────┬────────────┤
//! │ UserDirectory│ UserLocks     │ SessionLedger│ TokenCodec │
//! │ + Password-  │ (per-user     │ (records,    │ + Key-     │
//! │   Verifier   │  stripes)     │  pointer)    │  Authority │
//! └──────────────┴───────────────┴──────┬───────┴────────────┘
//!                                       │
//!                               SessionStore (storage crate)
//!
//!  BackgroundTasks: rotation loop (rotate + prune) · sweep loop
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenward_session::{
//!     BcryptPasswordVerifier, MemoryUserDirectory, SessionConfig, SessionOrchestrator,
//!     UserAccount,
//! };
//! use tokenward_storage::{InvalidationReason, MemorySessionStore, UserId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = MemoryUserDirectory::new();
//! directory.insert(
//!     "alice@example.com",
//!     UserAccount::builder().id("u-1").password_hash(bcrypt::hash("hunter2", 12)?).build(),
//! );
//!
//! let orchestrator = Arc::new(
//!     SessionOrchestrator::builder()
//!         .config(SessionConfig::default())
//!         .store(Arc::new(MemorySessionStore::new()))
//!         .directory(Arc::new(directory))
//!         .password_verifier(Arc::new(BcryptPasswordVerifier))
//!         .build()?,
//! );
//! let tasks = orchestrator.start().await?;
//!
//! let tokens = orchestrator.login("alice@example.com", "hunter2").await?;
//! let renewed = orchestrator.refresh(&tokens.refresh_token).await?;
//! orchestrator.invalidate_for_user(&UserId::from("u-1"), InvalidationReason::PasswordChanged).await?;
//! # let _ = renewed;
//!
//! tasks.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
mod locks;
pub mod metrics;
pub mod orchestrator;
pub mod tasks;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use config::SessionConfig;
pub use directory::{
    BcryptPasswordVerifier, MemoryUserDirectory, PasswordVerifier, UserAccount, UserDirectory,
};
pub use error::{Result, SessionError};
pub use ledger::{SessionLedger, SessionPair};
pub use metrics::{SessionMetrics, SessionMetricsSnapshot};
pub use orchestrator::{SessionOrchestrator, TokenPair};
pub use tasks::BackgroundTasks;
