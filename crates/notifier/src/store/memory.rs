//! In-memory record store with the same claim and transition semantics as
//! the PostgreSQL store. A single lock stands in for row locking, which makes
//! every claim trivially disjoint.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use huddle_common::error::AppError;
use huddle_common::types::{
    NotificationPayload, NotificationStatus, NotificationWorkItem, QueueStats,
    UserNotificationPreferences,
};

use super::NotificationStore;

#[derive(Default)]
struct MemoryState {
    /// Insertion order; `created_at` ties are broken by position.
    items: Vec<NotificationWorkItem>,
    preferences: HashMap<Uuid, UserNotificationPreferences>,
    fail_preference_lookups: bool,
}

impl MemoryState {
    fn find_mut(&mut self, id: Uuid) -> Option<&mut NotificationWorkItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    fn processing_mut(&mut self, id: Uuid) -> Result<&mut NotificationWorkItem, AppError> {
        match self.find_mut(id) {
            Some(item) if item.status == NotificationStatus::Processing => Ok(item),
            _ => Err(AppError::NotFound(format!(
                "Notification {} not found or not processing",
                id
            ))),
        }
    }
}

/// Process-local record store.
#[derive(Default)]
pub struct MemoryNotificationStore {
    state: Mutex<MemoryState>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user's channel preferences.
    pub async fn set_preferences(&self, preferences: UserNotificationPreferences) {
        let mut state = self.state.lock().await;
        state.preferences.insert(preferences.user_id, preferences);
    }

    /// Make subsequent preference lookups fail, as an unreachable account
    /// service would.
    pub async fn fail_preference_lookups(&self, fail: bool) {
        self.state.lock().await.fail_preference_lookups = fail;
    }

    /// Snapshot of every item in insertion order.
    pub async fn items(&self) -> Vec<NotificationWorkItem> {
        self.state.lock().await.items.clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn enqueue(&self, user_id: Uuid, payload: &NotificationPayload) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        state.items.push(NotificationWorkItem {
            id,
            user_id,
            payload: payload.clone(),
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        });
        Ok(id)
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<NotificationWorkItem>, AppError> {
        let mut state = self.state.lock().await;

        let mut candidates: Vec<usize> = state
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == NotificationStatus::Pending)
            .map(|(idx, _)| idx)
            .collect();
        candidates.sort_by_key(|idx| state.items[*idx].created_at);
        candidates.truncate(limit as usize);

        let now = Utc::now();
        let claimed = candidates
            .into_iter()
            .map(|idx| {
                let item = &mut state.items[idx];
                item.status = NotificationStatus::Processing;
                item.processed_at = Some(now);
                item.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let item = state.processing_mut(id)?;
        item.status = NotificationStatus::Completed;
        item.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let item = state.processing_mut(id)?;
        item.status = NotificationStatus::Failed;
        item.processed_at = Some(Utc::now());
        item.last_error = Some(error.to_string());
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let item = state.processing_mut(id)?;
        item.status = NotificationStatus::Pending;
        item.retry_count += 1;
        item.processed_at = Some(Utc::now());
        item.last_error = Some(error.to_string());
        Ok(())
    }

    async fn renew_claim(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.processing_mut(id)?.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_preferences(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserNotificationPreferences>, AppError> {
        let state = self.state.lock().await;
        if state.fail_preference_lookups {
            return Err(AppError::Internal(
                "preference lookup unavailable".to_string(),
            ));
        }
        Ok(user_ids
            .iter()
            .filter_map(|id| state.preferences.get(id).cloned())
            .collect())
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for item in state.items.iter_mut() {
            if item.status == NotificationStatus::Processing && ids.contains(&item.id) {
                item.status = NotificationStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - older_than;
        let mut state = self.state.lock().await;
        let mut requeued = 0;
        for item in state.items.iter_mut() {
            if item.status == NotificationStatus::Processing
                && item.processed_at.is_some_and(|at| at < cutoff)
            {
                item.status = NotificationStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<NotificationWorkItem, AppError> {
        let mut state = self.state.lock().await;
        match state.find_mut(id) {
            Some(item) if item.status == NotificationStatus::Failed => {
                item.status = NotificationStatus::Pending;
                item.retry_count = 0;
                Ok(item.clone())
            }
            _ => Err(AppError::NotFound(format!(
                "Failed notification {} not found",
                id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationWorkItem>, AppError> {
        let state = self.state.lock().await;
        Ok(state.items.iter().find(|item| item.id == id).cloned())
    }

    async fn status_counts(&self) -> Result<QueueStats, AppError> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for item in &state.items {
            stats.record(item.status, 1);
        }
        Ok(stats)
    }
}
