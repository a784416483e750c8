use crate::error::Result;
use crate::idempotency::store::{IdempotencyStore, SweepReport};
use std::time::Duration;

/// Periodic cleanup sweeps, owned and started by the caller.
pub struct IdempotencyCleanupJob {
    store: IdempotencyStore,
    threshold_ms: u64,
    interval: Duration,
}

impl IdempotencyCleanupJob {
    pub fn new(store: IdempotencyStore, threshold_ms: u64, interval: Duration) -> Self {
        Self {
            store,
            threshold_ms,
            interval,
        }
    }

    /// Runs the sweep once.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.store.auto_cleanup(self.threshold_ms).await
    }

    /// Starts the sweep loop in a background task. The first sweep runs
    /// immediately. Abort the handle to stop it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(report) => {
                        if report.total() > 0 {
                            tracing::info!(
                                "Cleaned up {} expired keys and {} stale responses",
                                report.keys_removed,
                                report.responses_removed
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to run idempotency cleanup: {}", e);
                    }
                }
            }
        })
    }
}
