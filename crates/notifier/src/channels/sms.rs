//! SMS delivery through an HTTP gateway.

use async_trait::async_trait;
use serde_json::json;

use huddle_common::types::ChannelKind;

use super::{ChannelSender, DeliveryError, HttpClientSlot};

pub struct SmsSender {
    gateway_url: String,
    token: String,
    from: String,
    http: HttpClientSlot,
}

impl SmsSender {
    pub fn new(gateway_url: impl Into<String>, token: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            from: from.into(),
            http: HttpClientSlot::new(ChannelKind::Sms),
        }
    }

    /// SMS has no subject line, so the topic is folded into the text.
    fn body_text(topic: &str, message: &str) -> String {
        if topic.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", topic, message)
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    async fn send(&self, address: &str, topic: &str, message: &str) -> Result<(), DeliveryError> {
        let body = json!({
            "from": self.from,
            "to": address,
            "body": Self::body_text(topic, message),
        });

        self.http.post_json(&self.gateway_url, &self.token, &body).await?;

        tracing::debug!(to = %address, "SMS accepted by gateway");
        Ok(())
    }

    fn channel_kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }
}
