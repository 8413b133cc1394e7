//! Session storage for the tokenward credential lifecycle engine.
//!
//! This crate owns the persisted half of session state: one
//! [`SessionRecord`] per issued token, the per-user [`ActiveSession`]
//! pointer, and the append-only [`InvalidationRecord`] log. It also
//! provides the identifier newtypes, the [`Clock`] abstraction, and the
//! audit logging shared by the higher layers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  tokenward-session                          │
//! │     SessionOrchestrator (login, refresh, logoff, sweep)     │
//! │     SessionLedger (begin, retire, retire-active, sweep)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  tokenward-authn                            │
//! │          KeyAuthority (rotation)  TokenCodec (JWT)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  tokenward-storage                          │
//! │   SessionStore trait, MemorySessionStore, audit, Clock      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use chrono::{Duration, Utc};
//! use tokenward_storage::{
//!     InvalidationReason, MemorySessionStore, SessionRecord, SessionScope, SessionStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemorySessionStore::new();
//!     let now = Utc::now();
//!     let record = SessionRecord::builder()
//!         .user_id("u-1")
//!         .scope(SessionScope::Login)
//!         .created_at(now)
//!         .expires_at(now + Duration::minutes(15))
//!         .build();
//!     store.insert_sessions(&[record.clone()]).await?;
//!
//!     // Retirement is a compare-and-swap: the second attempt conflicts.
//!     store.retire_if_active(&record.session_id, InvalidationReason::Logoff, now).await?;
//!     assert!(store.retire_if_active(&record.session_id, InvalidationReason::Logoff, now).await.is_err());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a manual clock, record factories and
//!   assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod clock;
pub mod error;
pub mod session;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{BoxError, StorageError, StorageResult};
pub use session::{
    ActiveSession, InvalidationReason, InvalidationRecord, MemorySessionStore, SessionRecord,
    SessionScope, SessionStore,
};
pub use types::{KeyId, SessionId, UserId};
