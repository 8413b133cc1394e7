//! Periodic background work: signing key rotation and the expired-session
//! sweep.
//!
//! Both loops share one [`CancellationToken`]. The first tick of each loop
//! fires one full period after start; the startup rotation is done by
//! [`SessionOrchestrator::start`] before the loops are spawned. A slow
//! iteration delays the next tick rather than bunching ticks up.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::SessionOrchestrator;

/// Handle to the spawned background loops.
///
/// Dropping the handle cancels the loops without waiting for them; call
/// [`shutdown`](Self::shutdown) to wait.
#[derive(Debug)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(orchestrator: Arc<SessionOrchestrator>) -> Self {
        let cancel = CancellationToken::new();
        let rotation = tokio::spawn(rotation_loop(Arc::clone(&orchestrator), cancel.clone()));
        let sweep = tokio::spawn(sweep_loop(orchestrator, cancel.clone()));
        Self { cancel, handles: vec![rotation, sweep] }
    }

    /// Returns a token that stops the loops when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` while any loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|handle| !handle.is_finished())
    }

    /// Cancels both loops and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
        tracing::info!("Background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn rotation_loop(orchestrator: Arc<SessionOrchestrator>, cancel: CancellationToken) {
    let mut ticker = ticker(orchestrator.config().rotation_interval());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => match orchestrator.rotate_keys().await {
                Ok(kid) => tracing::debug!(kid = %kid, "Scheduled key rotation complete"),
                Err(e) => tracing::error!(
                    error = %e,
                    "Scheduled key rotation failed; continuing with the previous key"
                ),
            },
        }
    }
    tracing::debug!("Key rotation task stopped");
}

async fn sweep_loop(orchestrator: Arc<SessionOrchestrator>, cancel: CancellationToken) {
    let mut ticker = ticker(orchestrator.config().sweep_interval());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => match orchestrator.sweep_expired().await {
                Ok(swept) if !swept.is_empty() => {
                    tracing::debug!(count = swept.len(), "Expired sessions swept");
                },
                Ok(_) => {},
                Err(e) => tracing::error!(error = %e, "Expired-session sweep failed"),
            },
        }
    }
    tracing::debug!("Sweep task stopped");
}
