//! SessionSweeper: background task that deletes expired session rows.
//!
//! Validation already refuses expired sessions; this only keeps the table
//! from growing with rows nobody will present again.

use std::sync::Arc;
use std::time::Duration;

use sqlgate_core::SessionService;
use tokio::time::MissedTickBehavior;

pub struct SessionSweeper {
    sessions: Arc<SessionService>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<SessionService>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// Run the sweep loop. This never returns under normal operation.
    /// Spawn it as a background task via `tokio::spawn`.
    pub async fn run(&self) {
        tracing::info!("SessionSweeper started (interval={:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// One pass. Failures are logged and retried on the next tick.
    pub async fn sweep_once(&self) -> Option<u64> {
        match self.sessions.purge_expired().await {
            Ok(0) => {
                tracing::debug!("no expired sessions");
                Some(0)
            }
            Ok(removed) => {
                tracing::info!(removed, "expired sessions purged");
                Some(removed)
            }
            Err(e) => {
                tracing::warn!("session sweep failed: {e}");
                None
            }
        }
    }
}
