//! PostgreSQL-backed record store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers each take a
//! disjoint batch instead of queueing behind each other's locks.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use huddle_common::error::AppError;
use huddle_common::types::{
    NotificationPayload, NotificationStatus, NotificationWorkItem, QueueStats,
    UserNotificationPreferences,
};

use super::NotificationStore;

/// Record store over the `notifications` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Map "no row updated" to NotFound for a status transition.
    fn ensure_transitioned(id: Uuid, rows_affected: u64) -> Result<(), AppError> {
        if rows_affected == 0 {
            return Err(AppError::NotFound(format!(
                "Notification {} not found or not processing",
                id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn enqueue(&self, user_id: Uuid, payload: &NotificationPayload) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, payload, status, created_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, 0)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(sqlx::types::Json(payload))
        .bind(NotificationStatus::Pending.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(notification_id = %id, user_id = %user_id, topic = %payload.topic, "Notification enqueued");
        Ok(id)
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<NotificationWorkItem>, AppError> {
        // Any `?` below drops `tx` uncommitted, which rolls it back and leaves
        // the candidate rows `pending`.
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM notifications
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        sqlx::query(
            "UPDATE notifications SET status = 'processing', processed_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        // Read everything the worker needs before committing, so a claim can
        // never leave rows `processing` without the data to act on them.
        let items: Vec<NotificationWorkItem> = sqlx::query_as(
            r#"
            SELECT id, user_id, payload, status, created_at, processed_at, retry_count, last_error
            FROM notifications
            WHERE id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(claimed = items.len(), limit, "Claimed notification batch");
        Ok(items)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'completed', processed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Self::ensure_transitioned(id, result.rows_affected())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', processed_at = NOW(), last_error = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Self::ensure_transitioned(id, result.rows_affected())
    }

    async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'pending', retry_count = retry_count + 1,
                processed_at = NOW(), last_error = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Self::ensure_transitioned(id, result.rows_affected())
    }

    async fn renew_claim(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET processed_at = NOW() WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Self::ensure_transitioned(id, result.rows_affected())
    }

    async fn get_preferences(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<UserNotificationPreferences>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let prefs: Vec<UserNotificationPreferences> = sqlx::query_as(
            r#"
            SELECT user_id, channels, email, phone, debug_address
            FROM user_notification_preferences
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(prefs)
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE notifications SET status = 'pending' WHERE id = ANY($1) AND status = 'processing'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'pending'
            WHERE id IN (
                SELECT id FROM notifications
                WHERE status = 'processing' AND processed_at < $1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<NotificationWorkItem, AppError> {
        let item: Option<NotificationWorkItem> = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = 'pending', retry_count = 0
            WHERE id = $1 AND status = 'failed'
            RETURNING id, user_id, payload, status, created_at, processed_at, retry_count, last_error
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let item = item.ok_or_else(|| {
            AppError::NotFound(format!("Failed notification {} not found", id))
        })?;

        tracing::info!(notification_id = %id, "Dead-lettered notification requeued");
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationWorkItem>, AppError> {
        let item: Option<NotificationWorkItem> = sqlx::query_as(
            r#"
            SELECT id, user_id, payload, status, created_at, processed_at, retry_count, last_error
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn status_counts(&self) -> Result<QueueStats, AppError> {
        let rows: Vec<(NotificationStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM notifications GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}
