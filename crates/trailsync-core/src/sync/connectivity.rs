//! Reacts to reachability changes from the platform.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::processor::SyncProcessor;

/// Follows a `watch` channel of reachability readings.
///
/// Regaining connectivity schedules a drain after the settle delay. Losing it
/// only flips the online flag; a pass already in flight runs to completion.
pub struct ConnectivityMonitor {
    processor: Arc<SyncProcessor>,
    settle_delay: Duration,
}

impl ConnectivityMonitor {
    pub const fn new(processor: Arc<SyncProcessor>, settle_delay: Duration) -> Self {
        Self {
            processor,
            settle_delay,
        }
    }

    /// Record one reading. Returns true on an offline to online transition.
    pub async fn apply(&self, online: bool) -> bool {
        let was_online = self.processor.set_online(online);
        if was_online != online {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
            self.processor.publish_status().await;
        }
        online && !was_online
    }

    /// Runs until cancelled or the reading source closes, then waits for any
    /// reconnect drain it started.
    pub async fn run(self, mut readings: watch::Receiver<bool>, cancel: CancellationToken) {
        let mut pending = Vec::new();
        let initial = *readings.borrow_and_update();
        if self.apply(initial).await {
            self.schedule_drain(&mut pending, &cancel);
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = readings.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Connectivity source closed");
                        break;
                    }
                    let online = *readings.borrow_and_update();
                    if self.apply(online).await {
                        self.schedule_drain(&mut pending, &cancel);
                    }
                }
            }
        }

        for handle in pending {
            if let Err(error) = handle.await {
                tracing::error!("Reconnect drain failed: {}", error);
            }
        }
        tracing::debug!("Connectivity monitor stopped");
    }

    fn schedule_drain(&self, pending: &mut Vec<JoinHandle<()>>, cancel: &CancellationToken) {
        pending.retain(|handle| !handle.is_finished());
        let processor = Arc::clone(&self.processor);
        let settle_delay = self.settle_delay;
        let cancel = cancel.child_token();

        pending.push(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(settle_delay) => {}
            }
            if !processor.is_online() {
                tracing::debug!("Went offline again before the settle delay elapsed");
                return;
            }
            match processor.drain().await {
                Ok(report) => tracing::debug!("Reconnect drain delivered {}", report.delivered),
                Err(skipped) => tracing::debug!("Reconnect drain skipped: {}", skipped),
            }
        }));
    }
}
