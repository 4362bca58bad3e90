use async_trait::async_trait;
use sqlx::PgPool;

use huddle_common::error::AppError;
use huddle_common::types::ExpiredEvent;

/// Entity-layer operation the scanner drives.
#[async_trait]
pub trait EventExpirer: Send + Sync {
    /// Mark up to `limit` overdue open events as expired and return them.
    ///
    /// An event is returned by at most one call across all callers, so a
    /// repeated scan never produces the same event twice.
    async fn mark_next_expired(&self, limit: u32) -> Result<Vec<ExpiredEvent>, AppError>;
}

/// Expirer over the `events` table.
#[derive(Clone)]
pub struct PgEventExpirer {
    pool: PgPool,
}

impl PgEventExpirer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventExpirer for PgEventExpirer {
    async fn mark_next_expired(&self, limit: u32) -> Result<Vec<ExpiredEvent>, AppError> {
        let expired = sqlx::query_as::<_, ExpiredEvent>(
            r#"
            UPDATE events
            SET status = 'expired', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM events
                WHERE status IN ('open', 'pending') AND ends_at < NOW()
                ORDER BY ends_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id AS event_id, owner_id AS user_id, NULLIF(title, '') AS title
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(expired)
    }
}
