//! Delivery channels.
//!
//! A sender knows how to deliver an `(address, topic, message)` triple on one
//! channel and nothing else; address resolution and fan-out live in the
//! dispatcher.

pub mod debug;
pub mod email;
pub mod sms;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use huddle_common::types::ChannelKind;

pub use debug::DebugSender;
pub use email::EmailSender;
pub use sms::SmsSender;

/// Per-request timeout for HTTP transports.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{channel} transport error: {message}")]
    Transport { channel: ChannelKind, message: String },

    #[error("{channel} provider rejected message ({status}): {body}")]
    Rejected {
        channel: ChannelKind,
        status: u16,
        body: String,
    },

    #[error("{channel} channel misconfigured: {message}")]
    Misconfigured { channel: ChannelKind, message: String },
}

/// One delivery channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, address: &str, topic: &str, message: &str) -> Result<(), DeliveryError>;

    fn channel_kind(&self) -> ChannelKind;
}

/// Lazily created HTTP client shared by one sender instance.
///
/// The mutex is held for the whole request, so one sender performs one
/// delivery at a time over its connection. A connect or timeout failure drops
/// the client and the next send builds a fresh one.
pub(crate) struct HttpClientSlot {
    channel: ChannelKind,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpClientSlot {
    pub(crate) fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            client: Mutex::new(None),
        }
    }

    /// POST `body` as JSON with a bearer token and map the outcome.
    pub(crate) async fn post_json(
        &self,
        url: &str,
        bearer: &str,
        body: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let mut slot = self.client.lock().await;

        if slot.is_none() {
            let client = reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .map_err(|e| DeliveryError::Misconfigured {
                    channel: self.channel,
                    message: e.to_string(),
                })?;
            tracing::debug!(channel = %self.channel, "Opened outbound HTTP client");
            *slot = Some(client);
        }

        let Some(client) = slot.as_ref() else {
            return Err(DeliveryError::Misconfigured {
                channel: self.channel,
                message: "HTTP client unavailable".to_string(),
            });
        };

        let response = match client.post(url).bearer_auth(bearer).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    tracing::warn!(channel = %self.channel, error = %e, "Dropping outbound HTTP client");
                    *slot = None;
                }
                return Err(DeliveryError::Transport {
                    channel: self.channel,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                channel: self.channel,
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn is_open(&self) -> bool {
        self.client.lock().await.is_some()
    }
}
