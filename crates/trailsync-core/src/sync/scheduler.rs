//! Fixed-interval drain trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::processor::SyncProcessor;

/// Triggers a drain every `period` when online, authenticated and idle.
pub struct PeriodicScheduler {
    processor: Arc<SyncProcessor>,
    period: Duration,
}

impl PeriodicScheduler {
    pub const fn new(processor: Arc<SyncProcessor>, period: Duration) -> Self {
        Self { processor, period }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!("Periodic sync every {:?}", self.period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        tracing::debug!("Periodic scheduler stopped");
    }

    async fn tick(&self) {
        if let Err(reason) = self.processor.readiness() {
            tracing::debug!("Periodic sync skipped: {}", reason);
            return;
        }
        match self.processor.drain().await {
            Ok(report) => tracing::debug!("Periodic drain delivered {}", report.delivered),
            Err(skipped) => tracing::debug!("Periodic drain skipped: {}", skipped),
        }
    }
}
