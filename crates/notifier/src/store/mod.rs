//! Notification record store.
//!
//! The store is the only shared mutable resource in the pipeline. All
//! coordination between worker instances goes through its transactions and
//! row locks; there is no leader election and no in-process lock across
//! workers.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use huddle_common::error::AppError;
use huddle_common::types::{
    ClaimedNotification, NotificationPayload, NotificationWorkItem, QueueStats,
    UserNotificationPreferences,
};

pub use memory::MemoryNotificationStore;
pub use postgres::PgNotificationStore;

/// Batch size used when a caller asks for `0`.
pub const DEFAULT_BATCH_SIZE: u32 = 20;

/// Resolve a requested batch size, mapping `0` to [`DEFAULT_BATCH_SIZE`].
pub fn effective_batch_size(limit: u32) -> u32 {
    if limit == 0 { DEFAULT_BATCH_SIZE } else { limit }
}

/// Durable storage for notification work items.
///
/// Status transitions apply only to items currently `processing`. They
/// return [`AppError::NotFound`] when the id does not exist or the item is in
/// any other state, so a worker never settles an item it no longer holds.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new `pending` item and return its id.
    async fn enqueue(&self, user_id: Uuid, payload: &NotificationPayload) -> Result<Uuid, AppError>;

    /// Atomically move up to `limit` of the oldest `pending` items to
    /// `processing` and return them. Rows locked by a concurrent claim are
    /// skipped, never waited on. On any error nothing is claimed.
    async fn claim_batch(&self, limit: u32) -> Result<Vec<NotificationWorkItem>, AppError>;

    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError>;

    /// Dead-letter an item, recording the last delivery error.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError>;

    /// Bump `retry_count`, record the error and put the item back to `pending`.
    async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), AppError>;

    /// Re-stamp `processed_at` on a `processing` item so stale-claim
    /// recovery does not hand it to a peer while it waits in a claim buffer.
    async fn renew_claim(&self, id: Uuid) -> Result<(), AppError>;

    /// Unlocked batch read of channel preferences. Users without a row are
    /// absent from the result.
    async fn get_preferences(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserNotificationPreferences>, AppError>;

    /// Return `processing` items to `pending` without counting a retry.
    async fn release(&self, ids: &[Uuid]) -> Result<u64, AppError>;

    /// Return items stuck in `processing` for longer than `older_than` to
    /// `pending`.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, AppError>;

    /// Move a dead-lettered item back to `pending` with a fresh retry budget.
    async fn requeue_failed(&self, id: Uuid) -> Result<NotificationWorkItem, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationWorkItem>, AppError>;

    async fn status_counts(&self) -> Result<QueueStats, AppError>;

    /// Claim a batch and attach each recipient's preferences.
    ///
    /// The preference read happens after the claim has committed. If it
    /// fails, the claimed items are still returned, with no preferences.
    async fn claim_with_preferences(
        &self,
        limit: u32,
    ) -> Result<Vec<ClaimedNotification>, AppError> {
        let items = self.claim_batch(effective_batch_size(limit)).await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<Uuid> = items
            .iter()
            .map(|item| item.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let preferences = match self.get_preferences(&user_ids).await {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    users = user_ids.len(),
                    "Preference lookup failed, delivering claimed batch without preferences"
                );
                Vec::new()
            }
        };

        Ok(items
            .into_iter()
            .map(|item| {
                let preferences = preferences
                    .iter()
                    .find(|p| p.user_id == item.user_id)
                    .cloned();
                ClaimedNotification { item, preferences }
            })
            .collect())
    }
}
