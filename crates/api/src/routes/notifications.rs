//! Queue inspection and operator requeue.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use huddle_common::error::AppError;
use huddle_common::types::{NotificationWorkItem, QueueStats};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/stats", get(queue_stats))
        .route("/api/notifications/{id}", get(get_notification))
        .route("/api/notifications/{id}/requeue", post(requeue_notification))
}

/// GET /api/notifications/stats: item counts per status.
async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.store.status_counts().await?))
}

async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationWorkItem>, AppError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
}

/// POST /api/notifications/:id/requeue: give a dead-lettered notification a
/// fresh retry budget.
async fn requeue_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationWorkItem>, AppError> {
    let item = state.store.requeue_failed(id).await?;
    tracing::info!(notification_id = %id, "Dead-lettered notification requeued by operator");
    Ok(Json(item))
}
