//! Huddle ops API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use huddle_common::config::AppConfig;
use huddle_common::db::create_pool;
use huddle_notifier::store::PgNotificationStore;

use huddle_api::routes::create_router;
use huddle_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("huddle_api=debug,huddle_notifier=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Huddle ops API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    let state = AppState::new(Arc::new(PgNotificationStore::new(pool)));

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
