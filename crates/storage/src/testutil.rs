//! Shared test utilities for session storage testing.
//!
//! Feature-gated behind `testutil` to prevent leaking into production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tokenward-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tokenward_storage::testutil::{ManualClock, make_session};
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    error::{StorageError, StorageResult},
    session::{SessionRecord, SessionScope},
};

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Creates a clock frozen at a fixed, whole-second instant.
    #[must_use]
    pub fn at_epoch_offset(seconds: i64) -> Self {
        let start = Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now);
        Self::new(start)
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Moves the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // 2026-01-01T00:00:00Z
        Self::at_epoch_offset(1_767_225_600)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Builds an active session record for `user` created at `created_at` and
/// living for `ttl`.
#[must_use]
pub fn make_session(
    user: &str,
    scope: SessionScope,
    created_at: DateTime<Utc>,
    ttl: Duration,
) -> SessionRecord {
    SessionRecord::builder()
        .user_id(user)
        .scope(scope)
        .created_at(created_at)
        .expires_at(created_at + ttl)
        .build()
}

/// Asserts that a [`StorageResult`] is an `Err` matching the given
/// [`StorageError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tokenward_storage::assert_storage_error;
/// use tokenward_storage::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::conflict());
/// assert_storage_error!(result, Conflict);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "expected StorageError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "{}: expected StorageError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Helper to verify that a result is a `Conflict` error.
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}

/// Helper to verify that a result is a `NotFound` error.
pub fn is_not_found<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotFound { .. }))
}
