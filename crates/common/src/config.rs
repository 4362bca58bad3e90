use std::str::FromStr;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Failed attempts tolerated before a notification is dead-lettered (default: 3)
    pub worker_max_retries: u32,

    /// Seconds between notification worker ticks (default: 10)
    pub worker_ticker_interval_seconds: u64,

    /// Notifications claimed per store round-trip (default: 20)
    pub worker_batch_size: u32,

    /// Seconds after which a `processing` claim is considered abandoned (default: 600, 0 = off)
    pub worker_processing_timeout_seconds: u64,

    /// Seconds between expiration scanner ticks (default: 60)
    pub expiry_ticker_interval_seconds: u64,

    /// Events expired per scanner round-trip (default: 100)
    pub expiry_batch_size: u32,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: Option<String>,

    /// SMS gateway endpoint
    pub sms_gateway_url: Option<String>,

    /// SMS gateway bearer token
    pub sms_gateway_token: Option<String>,

    /// SMS sender id / number
    pub sms_from: Option<String>,

    /// Register the log-only debug channel
    pub debug_channel_enabled: bool,

    /// Port for the ops API
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            worker_max_retries: env_or("WORKER_MAX_RETRIES", 3)?,
            worker_ticker_interval_seconds: env_or("WORKER_TICKER_INTERVAL_SECONDS", 10)?,
            worker_batch_size: env_or("WORKER_BATCH_SIZE", 20)?,
            worker_processing_timeout_seconds: env_or("WORKER_PROCESSING_TIMEOUT_SECONDS", 600)?,
            expiry_ticker_interval_seconds: env_or("EXPIRY_TICKER_INTERVAL_SECONDS", 60)?,
            expiry_batch_size: env_or("EXPIRY_BATCH_SIZE", 100)?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            resend_api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            email_from: std::env::var("EMAIL_FROM").ok(),
            sms_gateway_url: std::env::var("SMS_GATEWAY_URL").ok(),
            sms_gateway_token: std::env::var("SMS_GATEWAY_TOKEN").ok(),
            sms_from: std::env::var("SMS_FROM").ok(),
            debug_channel_enabled: env_or("DEBUG_CHANNEL_ENABLED", false)?,
            api_port: env_or("API_PORT", 3000)?,
        })
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}
