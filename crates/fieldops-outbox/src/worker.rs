//! Background flush worker.

use crate::{OutboxError, OutboxQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

impl OutboxQueue {
    /// Spawn a task that flushes on every wake-up and every `flush_interval`.
    ///
    /// Wake-ups that arrive while a pass is running collapse into one
    /// follow-up pass. The task exits once the queue is dropped.
    pub fn start_worker(self: &Arc<Self>, flush_interval: Duration) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = flush_interval.as_secs(), "Outbox flush worker started");

            loop {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = ticker.tick() => {}
                }

                let Some(queue) = queue.upgrade() else {
                    break;
                };

                match queue.attempt_flush().await {
                    Ok(report) if report.skipped => {}
                    Ok(report) => {
                        debug!(delivered = report.delivered, "Worker flush pass complete");
                    }
                    Err(OutboxError::AuthRequired(message)) => {
                        warn!(error = %message, "Flush halted until credentials are refreshed");
                    }
                    Err(e) => warn!(error = %e, "Worker flush pass failed"),
                }
            }

            info!("Outbox flush worker stopped");
        })
    }
}
