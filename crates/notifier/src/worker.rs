//! Notification worker: the polling loop that drains due work items,
//! dispatches them and applies the retry / dead-letter policy.
//!
//! Per item: `Pending → Processing → {Completed | Pending (retry) | Failed}`.
//! Several worker instances may run against the same store; one instance
//! never runs two drain passes at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use huddle_common::config::AppConfig;
use huddle_common::error::AppError;
use huddle_common::types::ClaimedNotification;

use crate::dispatcher::FanOutDispatcher;
use crate::queue::NotificationQueue;

/// Upper bound for the stale-claim age (one year).
const MAX_PROCESSING_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Worker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Failed attempts that are retried before the item is dead-lettered.
    pub max_retries: u32,
    pub ticker_interval_seconds: u64,
    /// Store claim size; 0 selects the store default.
    pub batch_size: u32,
    /// Age after which a `processing` claim is handed back; 0 disables.
    pub processing_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ticker_interval_seconds: 10,
            batch_size: 0,
            processing_timeout_seconds: 600,
        }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.worker_max_retries,
            ticker_interval_seconds: config.worker_ticker_interval_seconds,
            batch_size: config.worker_batch_size,
            processing_timeout_seconds: config.worker_processing_timeout_seconds,
        }
    }
}

/// What to do with an item whose delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    DeadLetter,
}

impl RetryDecision {
    /// `retry_count` is the number of earlier failed attempts.
    pub fn after_failure(retry_count: u32, max_retries: u32) -> Self {
        if retry_count >= max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry
        }
    }
}

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Stale claims handed back before draining.
    pub recovered: u64,
    /// Status transitions that failed in the store.
    pub transition_errors: usize,
}

pub struct NotificationWorker {
    queue: Arc<NotificationQueue>,
    dispatcher: Arc<FanOutDispatcher>,
    config: WorkerConfig,
    drain_lock: Mutex<()>,
    stop: CancellationToken,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<NotificationQueue>,
        dispatcher: Arc<FanOutDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            config,
            drain_lock: Mutex::new(()),
            stop: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Ask a running [`run`](Self::run) loop to return after the current item.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Tick until `cancel` fires or [`stop`](Self::stop) is called.
    ///
    /// Errors are logged and never end the loop. On exit, claims buffered but
    /// not yet processed are handed back to the store.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.ticker_interval_seconds.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            max_retries = self.config.max_retries,
            batch_size = self.queue.batch_size(),
            senders = self.dispatcher.sender_count(),
            "Notification worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.drain(&cancel).await;
                    if report.processed > 0 || report.recovered > 0 {
                        tracing::info!(
                            processed = report.processed,
                            completed = report.completed,
                            retried = report.retried,
                            dead_lettered = report.dead_lettered,
                            recovered = report.recovered,
                            "Notification tick finished"
                        );
                    }
                }
            }
        }

        if let Err(e) = self.queue.release_buffered().await {
            tracing::error!(error = %e, "Failed to release buffered claims on shutdown");
        }

        tracing::info!("Notification worker stopped");
    }

    /// Run one drain pass to completion.
    pub async fn tick(&self) -> TickReport {
        self.drain(&CancellationToken::new()).await
    }

    async fn drain(&self, cancel: &CancellationToken) -> TickReport {
        let _pass = self.drain_lock.lock().await;
        let mut report = TickReport::default();

        if self.config.processing_timeout_seconds > 0 {
            let secs = self.config.processing_timeout_seconds.min(MAX_PROCESSING_TIMEOUT_SECS);
            let timeout = chrono::Duration::seconds(secs as i64);
            match self.queue.store().requeue_stale(timeout).await {
                Ok(0) => {}
                Ok(n) => {
                    tracing::warn!(recovered = n, "Returned stale processing claims to pending");
                    report.recovered = n;
                }
                Err(e) => tracing::error!(error = %e, "Stale claim recovery failed"),
            }
        }

        // Items retried during this pass wait for a later tick.
        let mut retried: HashSet<Uuid> = HashSet::new();

        loop {
            if cancel.is_cancelled() || self.stop.is_cancelled() {
                break;
            }

            let claimed = match self.queue.claim_next().await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim notifications, retrying next tick");
                    break;
                }
            };

            if retried.contains(&claimed.item.id) {
                self.defer_to_next_tick(claimed.item.id).await;
                break;
            }

            let id = claimed.item.id;
            if self.process(claimed, &mut report).await {
                retried.insert(id);
            }
        }

        report
    }

    /// Hand back `id` and the rest of the claim buffer without an attempt.
    async fn defer_to_next_tick(&self, id: Uuid) {
        if let Err(e) = self.queue.store().release(&[id]).await {
            tracing::error!(notification_id = %id, error = %e, "Failed to release retried notification");
        }
        match self.queue.release_buffered().await {
            Ok(released) => tracing::debug!(
                released = released + 1,
                "Retried notifications came back this pass, deferring to next tick"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to release buffered claims"),
        }
    }

    /// Returns true when the item went back to `pending` for a retry.
    async fn process(&self, claimed: ClaimedNotification, report: &mut TickReport) -> bool {
        let id = claimed.item.id;
        let retry_count = claimed.item.retry_count;
        report.processed += 1;

        let delivery_error = match self.dispatcher.send(&claimed).await {
            Ok(dispatch) => {
                match self.queue.mark_completed(id).await {
                    Ok(()) => {
                        report.completed += 1;
                        tracing::info!(
                            notification_id = %id,
                            channels = dispatch.sent,
                            "Notification delivered"
                        );
                    }
                    Err(e) => Self::transition_failed(id, "completed", &e, report),
                }
                return false;
            }
            Err(e) => e,
        };

        let reason = delivery_error.to_string();
        match RetryDecision::after_failure(retry_count, self.config.max_retries) {
            RetryDecision::Retry => match self.queue.increment_retry(id, &reason).await {
                Ok(()) => {
                    report.retried += 1;
                    tracing::warn!(
                        notification_id = %id,
                        retry_count = retry_count + 1,
                        max_retries = self.config.max_retries,
                        error = %reason,
                        "Delivery failed, will retry"
                    );
                    true
                }
                Err(e) => {
                    Self::transition_failed(id, "pending", &e, report);
                    false
                }
            },
            RetryDecision::DeadLetter => {
                match self.queue.mark_failed(id, &reason).await {
                    Ok(()) => {
                        report.dead_lettered += 1;
                        tracing::error!(
                            notification_id = %id,
                            retry_count,
                            error = %reason,
                            "Delivery failed permanently, notification dead-lettered"
                        );
                    }
                    Err(e) => Self::transition_failed(id, "failed", &e, report),
                }
                false
            }
        }
    }

    fn transition_failed(id: Uuid, target: &str, error: &AppError, report: &mut TickReport) {
        report.transition_errors += 1;
        if error.is_not_found() {
            tracing::warn!(notification_id = %id, target, error = %error, "Notification no longer claimed, status update skipped");
        } else {
            tracing::error!(notification_id = %id, target, error = %error, "Failed to update notification status");
        }
    }
}
