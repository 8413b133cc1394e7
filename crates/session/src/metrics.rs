//! Counters for session lifecycle operations.
//!
//! # Examples
//!
//! ```
//! use tokenward_session::SessionMetrics;
//!
//! let metrics = SessionMetrics::new();
//! metrics.record_login();
//! metrics.record_swept(3);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.logins, 1);
//! assert_eq!(snapshot.swept_sessions, 3);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct SessionMetricsSnapshot {
    /// Successful logins.
    #[builder(default)]
    pub logins: u64,
    /// Logins rejected for any reason.
    #[builder(default)]
    pub failed_logins: u64,
    /// Successful refreshes.
    #[builder(default)]
    pub refreshes: u64,
    /// Refresh or recovery tokens rejected as expired or reused.
    #[builder(default)]
    pub reuse_rejections: u64,
    /// Logoffs.
    #[builder(default)]
    pub logoffs: u64,
    /// Password change/reset invalidations.
    #[builder(default)]
    pub forced_invalidations: u64,
    /// Records retired by the sweep.
    #[builder(default)]
    pub swept_sessions: u64,
    /// Successful key rotations.
    #[builder(default)]
    pub rotations: u64,
    /// Failed key rotations.
    #[builder(default)]
    pub rotation_failures: u64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    logins: AtomicU64,
    failed_logins: AtomicU64,
    refreshes: AtomicU64,
    reuse_rejections: AtomicU64,
    logoffs: AtomicU64,
    forced_invalidations: AtomicU64,
    swept_sessions: AtomicU64,
    rotations: AtomicU64,
    rotation_failures: AtomicU64,
}

/// Lock-free session counters. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    inner: Arc<MetricsInner>,
}

impl SessionMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a successful login.
    pub fn record_login(&self) {
        self.inner.logins.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a rejected login.
    pub fn record_failed_login(&self) {
        self.inner.failed_logins.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a successful refresh.
    pub fn record_refresh(&self) {
        self.inner.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a rejected refresh or recovery token.
    pub fn record_reuse_rejection(&self) {
        self.inner.reuse_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a logoff.
    pub fn record_logoff(&self) {
        self.inner.logoffs.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a forced invalidation.
    pub fn record_forced_invalidation(&self) {
        self.inner.forced_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `count` swept records.
    pub fn record_swept(&self, count: usize) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        self.inner.swept_sessions.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts a key rotation attempt.
    pub fn record_rotation(&self, succeeded: bool) {
        if succeeded {
            self.inner.rotations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.rotation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot::builder()
            .logins(self.inner.logins.load(Ordering::Relaxed))
            .failed_logins(self.inner.failed_logins.load(Ordering::Relaxed))
            .refreshes(self.inner.refreshes.load(Ordering::Relaxed))
            .reuse_rejections(self.inner.reuse_rejections.load(Ordering::Relaxed))
            .logoffs(self.inner.logoffs.load(Ordering::Relaxed))
            .forced_invalidations(self.inner.forced_invalidations.load(Ordering::Relaxed))
            .swept_sessions(self.inner.swept_sessions.load(Ordering::Relaxed))
            .rotations(self.inner.rotations.load(Ordering::Relaxed))
            .rotation_failures(self.inner.rotation_failures.load(Ordering::Relaxed))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = SessionMetrics::new();
        let clone = metrics.clone();

        clone.record_refresh();
        clone.record_rotation(true);
        clone.record_rotation(false);
        metrics.record_failed_login();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refreshes, 1);
        assert_eq!(snapshot.rotations, 1);
        assert_eq!(snapshot.rotation_failures, 1);
        assert_eq!(snapshot.failed_logins, 1);
        assert_eq!(snapshot.logins, 0);
    }

    #[test]
    fn test_snapshot_builder_defaults_to_zero() {
        let snapshot = SessionMetricsSnapshot::builder().logoffs(2).build();
        assert_eq!(snapshot, SessionMetricsSnapshot { logoffs: 2, ..Default::default() });
    }
}
