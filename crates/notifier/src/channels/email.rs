//! Email delivery through the Resend HTTP API.

use async_trait::async_trait;
use serde_json::json;

use huddle_common::types::ChannelKind;

use super::{ChannelSender, DeliveryError, HttpClientSlot};

pub struct EmailSender {
    api_url: String,
    api_key: String,
    from: String,
    http: HttpClientSlot,
}

impl EmailSender {
    /// `api_url` is the Resend base URL, e.g. `https://api.resend.com`.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
            http: HttpClientSlot::new(ChannelKind::Email),
        }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, address: &str, topic: &str, message: &str) -> Result<(), DeliveryError> {
        let body = json!({
            "from": self.from,
            "to": [address],
            "subject": topic,
            "text": message,
        });

        self.http
            .post_json(&format!("{}/emails", self.api_url), &self.api_key, &body)
            .await?;

        tracing::debug!(to = %address, subject = %topic, "Email accepted by provider");
        Ok(())
    }

    fn channel_kind(&self) -> ChannelKind {
        ChannelKind::Email
    }
}
