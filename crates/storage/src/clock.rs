//! Time source shared by key rotation, session bookkeeping and token expiry.

use chrono::{DateTime, Utc};

/// Source of the current instant.
///
/// Token issuance and token verification must read the same clock, so every
/// component that timestamps or compares times takes an `Arc<dyn Clock>`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time via [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
