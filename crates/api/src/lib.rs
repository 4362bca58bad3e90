//! Operator-facing HTTP API over the notification store.
//!
//! - GET  /health
//! - GET  /api/notifications/stats
//! - GET  /api/notifications/{id}
//! - POST /api/notifications/{id}/requeue

pub mod routes;
pub mod state;
