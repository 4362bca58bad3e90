//! Queue abstraction over the record store.
//!
//! Producers only ever call [`NotificationQueue::enqueue`]. Workers call
//! [`NotificationQueue::claim_next`] in a loop until it returns `None`; the
//! queue claims from the store in batches behind the scenes.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use huddle_common::error::AppError;
use huddle_common::types::{ClaimedNotification, NotificationPayload};

use crate::store::{NotificationStore, effective_batch_size};

#[derive(Default)]
struct ClaimBuffer {
    items: VecDeque<ClaimedNotification>,
    /// The last store claim came back short, so the pending pool was empty
    /// at that moment.
    drained: bool,
}

/// Batched, one-at-a-time view of the notification store.
pub struct NotificationQueue {
    store: Arc<dyn NotificationStore>,
    batch_size: u32,
    buffer: Mutex<ClaimBuffer>,
}

impl NotificationQueue {
    /// `batch_size` of 0 selects the store default.
    pub fn new(store: Arc<dyn NotificationStore>, batch_size: u32) -> Self {
        Self {
            store,
            batch_size: effective_batch_size(batch_size),
            buffer: Mutex::new(ClaimBuffer::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Queue a notification for `user_id`. Errors go back to the producer.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        payload: &NotificationPayload,
    ) -> Result<Uuid, AppError> {
        let id = self.store.enqueue(user_id, payload).await?;
        tracing::info!(
            notification_id = %id,
            user_id = %user_id,
            template = payload.template_type.as_deref().unwrap_or("none"),
            "Notification queued"
        );
        Ok(id)
    }

    /// Next claimed item, or `None` once the pending pool is drained.
    ///
    /// After a short batch has been fully served this returns `None` without
    /// another store round-trip; the following call claims afresh.
    ///
    /// Items that waited in the buffer have their claim renewed before they
    /// are served. An item whose claim was lost in the meantime is skipped.
    pub async fn claim_next(&self) -> Result<Option<ClaimedNotification>, AppError> {
        let mut buffer = self.buffer.lock().await;

        while let Some(claimed) = buffer.items.pop_front() {
            match self.store.renew_claim(claimed.item.id).await {
                Ok(()) => return Ok(Some(claimed)),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        notification_id = %claimed.item.id,
                        "Buffered claim lost before delivery, skipping"
                    );
                }
                Err(e) => {
                    buffer.items.push_front(claimed);
                    return Err(e);
                }
            }
        }

        if buffer.drained {
            buffer.drained = false;
            return Ok(None);
        }

        let batch = self.store.claim_with_preferences(self.batch_size).await?;
        buffer.drained = batch.len() < self.batch_size as usize;
        buffer.items.extend(batch);

        match buffer.items.pop_front() {
            Some(item) => Ok(Some(item)),
            None => {
                buffer.drained = false;
                Ok(None)
            }
        }
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
        self.store.mark_completed(id).await
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        self.store.mark_failed(id, error).await
    }

    pub async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        self.store.increment_retry(id, error).await
    }

    /// Hand claimed-but-unserved items back to the store as `pending`.
    pub async fn release_buffered(&self) -> Result<u64, AppError> {
        let ids: Vec<Uuid> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drained = false;
            buffer.items.drain(..).map(|claimed| claimed.item.id).collect()
        };

        if ids.is_empty() {
            return Ok(0);
        }

        let released = self.store.release(&ids).await?;
        tracing::info!(released, "Released buffered notification claims");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;
    use huddle_common::types::{
        NotificationStatus, NotificationWorkItem, QueueStats, UserNotificationPreferences,
    };

    use super::*;
    use crate::store::MemoryNotificationStore;

    /// Counts store claims while delegating to an in-memory store.
    struct CountingStore {
        inner: MemoryNotificationStore,
        claims: std::sync::Mutex<Vec<usize>>,
        claim_calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationStore for CountingStore {
        async fn enqueue(&self, user_id: Uuid, payload: &NotificationPayload) -> Result<Uuid, AppError> {
            self.inner.enqueue(user_id, payload).await
        }
        async fn claim_batch(&self, limit: u32) -> Result<Vec<NotificationWorkItem>, AppError> {
            self.claim_calls.fetch_add(1, Ordering::SeqCst);
            let items = self.inner.claim_batch(limit).await?;
            self.claims.lock().unwrap().push(items.len());
            Ok(items)
        }
        async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
            self.inner.mark_completed(id).await
        }
        async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
            self.inner.mark_failed(id, error).await
        }
        async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), AppError> {
            self.inner.increment_retry(id, error).await
        }
        async fn renew_claim(&self, id: Uuid) -> Result<(), AppError> {
            self.inner.renew_claim(id).await
        }
        async fn get_preferences(&self, user_ids: &[Uuid]) -> Result<Vec<UserNotificationPreferences>, AppError> {
            self.inner.get_preferences(user_ids).await
        }
        async fn release(&self, ids: &[Uuid]) -> Result<u64, AppError> {
            self.inner.release(ids).await
        }
        async fn requeue_stale(&self, older_than: Duration) -> Result<u64, AppError> {
            self.inner.requeue_stale(older_than).await
        }
        async fn requeue_failed(&self, id: Uuid) -> Result<NotificationWorkItem, AppError> {
            self.inner.requeue_failed(id).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<NotificationWorkItem>, AppError> {
            self.inner.get(id).await
        }
        async fn status_counts(&self) -> Result<QueueStats, AppError> {
            self.inner.status_counts().await
        }
    }

    fn counting_store() -> Arc<CountingStore> {
        Arc::new(CountingStore {
            inner: MemoryNotificationStore::new(),
            claims: std::sync::Mutex::new(Vec::new()),
            claim_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_claim_next_drains_in_batches() {
        let store = counting_store();
        let user = Uuid::new_v4();
        for n in 0..250 {
            store
                .enqueue(user, &NotificationPayload::new(format!("t{}", n), "m"))
                .await
                .unwrap();
        }

        let queue = NotificationQueue::new(store.clone(), 100);
        let mut served = 0;
        while let Some(claimed) = queue.claim_next().await.unwrap() {
            queue.mark_completed(claimed.item.id).await.unwrap();
            served += 1;
        }

        assert_eq!(served, 250);
        assert_eq!(*store.claims.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(store.claim_calls.load(Ordering::SeqCst), 3);

        // Next pass starts a fresh claim against the now-empty pool.
        assert!(queue.claim_next().await.unwrap().is_none());
        assert_eq!(store.claim_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_claim() {
        let store = counting_store();
        let user = Uuid::new_v4();
        for _ in 0..4 {
            store.enqueue(user, &NotificationPayload::new("t", "m")).await.unwrap();
        }

        let queue = NotificationQueue::new(store.clone(), 2);
        let mut served = 0;
        while queue.claim_next().await.unwrap().is_some() {
            served += 1;
        }
        assert_eq!(served, 4);
        assert_eq!(*store.claims.lock().unwrap(), vec![2, 2, 0]);
    }

    #[tokio::test]
    async fn test_zero_batch_size_uses_default() {
        let queue = NotificationQueue::new(Arc::new(MemoryNotificationStore::new()), 0);
        assert_eq!(queue.batch_size(), crate::store::DEFAULT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_buffered_item_claim_is_renewed_when_served() {
        let store = Arc::new(MemoryNotificationStore::new());
        let user = Uuid::new_v4();
        for _ in 0..2 {
            store.enqueue(user, &NotificationPayload::new("t", "m")).await.unwrap();
        }

        let queue = NotificationQueue::new(store.clone(), 2);
        queue.claim_next().await.unwrap().unwrap();
        let waiting = store.items().await[1].clone();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let served = queue.claim_next().await.unwrap().unwrap();

        assert_eq!(served.item.id, waiting.id);
        let renewed = store.get(waiting.id).await.unwrap().unwrap();
        assert!(renewed.processed_at.unwrap() > waiting.processed_at.unwrap());
    }

    #[tokio::test]
    async fn test_buffered_item_with_lost_claim_is_skipped() {
        let store = Arc::new(MemoryNotificationStore::new());
        let user = Uuid::new_v4();
        for _ in 0..2 {
            store.enqueue(user, &NotificationPayload::new("t", "m")).await.unwrap();
        }

        let queue = NotificationQueue::new(store.clone(), 2);
        let first = queue.claim_next().await.unwrap().unwrap();

        // A peer recovered the whole batch as stale and settled the second item.
        store.requeue_stale(Duration::seconds(-1)).await.unwrap();
        let second = store.items().await[1].id;
        let reclaimed = store.claim_batch(2).await.unwrap();
        assert_eq!(reclaimed.len(), 2);
        store.mark_completed(second).await.unwrap();

        // The stale buffered copy is never served; the first item is still
        // held by the peer, so nothing is left to claim.
        assert!(queue.claim_next().await.unwrap().is_none());
        assert!(store.mark_completed(first.item.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_buffered_returns_items_to_pending() {
        let store = Arc::new(MemoryNotificationStore::new());
        let user = Uuid::new_v4();
        for _ in 0..5 {
            store.enqueue(user, &NotificationPayload::new("t", "m")).await.unwrap();
        }

        let queue = NotificationQueue::new(store.clone(), 5);
        let first = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(queue.release_buffered().await.unwrap(), 4);

        let stats = store.status_counts().await.unwrap();
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.processing, 1);
        assert_eq!(
            store.get(first.item.id).await.unwrap().unwrap().status,
            NotificationStatus::Processing
        );
    }
}
