use async_trait::async_trait;

use huddle_common::types::ChannelKind;

use super::{ChannelSender, DeliveryError};

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct DebugSender;

impl DebugSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelSender for DebugSender {
    async fn send(&self, address: &str, topic: &str, message: &str) -> Result<(), DeliveryError> {
        tracing::info!(sink = %address, topic = %topic, message = %message, "Debug notification");
        Ok(())
    }

    fn channel_kind(&self) -> ChannelKind {
        ChannelKind::Debug
    }
}
