use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use huddle_common::config::AppConfig;
use huddle_common::types::NotificationPayload;
use huddle_notifier::queue::NotificationQueue;

use crate::expirer::EventExpirer;

/// Batch size used when the configured value is 0.
pub const DEFAULT_EXPIRY_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryConfig {
    pub ticker_interval_seconds: u64,
    /// Events expired per round-trip; 0 selects the default.
    pub batch_size: u32,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            ticker_interval_seconds: 60,
            batch_size: DEFAULT_EXPIRY_BATCH_SIZE,
        }
    }
}

impl From<&AppConfig> for ExpiryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            ticker_interval_seconds: config.expiry_ticker_interval_seconds,
            batch_size: config.expiry_batch_size,
        }
    }
}

/// Periodically expires overdue events and notifies their owners.
pub struct ExpirationScanner {
    expirer: Arc<dyn EventExpirer>,
    queue: Arc<NotificationQueue>,
    config: ExpiryConfig,
    stop: CancellationToken,
}

impl ExpirationScanner {
    pub fn new(expirer: Arc<dyn EventExpirer>, queue: Arc<NotificationQueue>, config: ExpiryConfig) -> Self {
        Self {
            expirer,
            queue,
            config,
            stop: CancellationToken::new(),
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Scan on every tick until `cancel` fires or [`stop`](Self::stop) is called.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.ticker_interval_seconds.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            batch_size = self.batch_size(),
            "Expiration scanner started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    match self.scan().await {
                        Ok(0) => {}
                        Ok(notified) => tracing::info!(notified, "Expiration scan finished"),
                        Err(e) => tracing::error!(error = %e, "Expiration scan aborted, resuming next tick"),
                    }
                }
            }
        }

        tracing::info!("Expiration scanner stopped");
    }

    /// Expire everything currently overdue and return the number of
    /// notifications queued.
    ///
    /// Stops at the first batch shorter than the batch size. An error ends
    /// the pass; batches handled before it stay expired and notified.
    pub async fn scan(&self) -> anyhow::Result<usize> {
        let batch_size = self.batch_size();
        let mut notified = 0;

        loop {
            let expired = self.expirer.mark_next_expired(batch_size).await?;
            let count = expired.len();

            let mut enqueue_failures = 0;
            for event in expired {
                let payload = NotificationPayload::event_expired(event.event_id, event.title.as_deref());
                match self.queue.enqueue(event.user_id, &payload).await {
                    Ok(_) => notified += 1,
                    Err(e) => {
                        enqueue_failures += 1;
                        tracing::error!(
                            event_id = %event.event_id,
                            user_id = %event.user_id,
                            error = %e,
                            "Failed to queue expiration notification"
                        );
                    }
                }
            }

            if enqueue_failures > 0 {
                anyhow::bail!("{} expiration notifications could not be queued", enqueue_failures);
            }

            if count < batch_size as usize {
                break;
            }
        }

        Ok(notified)
    }

    fn batch_size(&self) -> u32 {
        if self.config.batch_size == 0 {
            DEFAULT_EXPIRY_BATCH_SIZE
        } else {
            self.config.batch_size
        }
    }
}
