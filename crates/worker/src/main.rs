//! Huddle background worker: notification delivery plus event expiration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use huddle_common::config::AppConfig;
use huddle_common::db;
use huddle_expiry::{ExpirationScanner, ExpiryConfig, PgEventExpirer};
use huddle_notifier::channels::{DebugSender, EmailSender, SmsSender};
use huddle_notifier::dispatcher::FanOutDispatcher;
use huddle_notifier::queue::NotificationQueue;
use huddle_notifier::store::PgNotificationStore;
use huddle_notifier::worker::{NotificationWorker, WorkerConfig};

/// Register a sender for every channel whose settings are present.
fn build_dispatcher(config: &AppConfig) -> FanOutDispatcher {
    let mut dispatcher = FanOutDispatcher::new();

    match (&config.resend_api_key, &config.email_from) {
        (Some(key), Some(from)) => {
            dispatcher.register(Arc::new(EmailSender::new(&config.resend_api_url, key, from)));
        }
        _ => tracing::warn!("RESEND_API_KEY or EMAIL_FROM not set, email channel disabled"),
    }

    match (&config.sms_gateway_url, &config.sms_gateway_token, &config.sms_from) {
        (Some(url), Some(token), Some(from)) => {
            dispatcher.register(Arc::new(SmsSender::new(url, token, from)));
        }
        _ => tracing::warn!("SMS gateway not configured, SMS channel disabled"),
    }

    if config.debug_channel_enabled {
        dispatcher.register(Arc::new(DebugSender::new()));
    }

    dispatcher
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "huddle_worker=info,huddle_notifier=info,huddle_expiry=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Huddle worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(PgNotificationStore::new(pool.clone()));
    let worker_config = WorkerConfig::from(&config);
    let queue = Arc::new(NotificationQueue::new(store, worker_config.batch_size));

    let worker = NotificationWorker::new(
        Arc::clone(&queue),
        Arc::new(build_dispatcher(&config)),
        worker_config,
    );
    let scanner = ExpirationScanner::new(
        Arc::new(PgEventExpirer::new(pool)),
        queue,
        ExpiryConfig::from(&config),
    );

    let cancel = CancellationToken::new();

    let worker_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };
    let scanner_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scanner.run(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");
    cancel.cancel();

    let (worker_result, scanner_result) = tokio::join!(worker_handle, scanner_handle);
    worker_result?;
    scanner_result?;

    tracing::info!("Huddle worker stopped.");
    Ok(())
}
