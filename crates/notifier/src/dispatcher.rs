//! Fan-out dispatcher: delivers one notification over every channel the
//! recipient has enabled and configured.
//!
//! Senders are tried in registration order. The first sender error ends the
//! pass and is returned; channels after it are not attempted for this
//! attempt. A later retry starts again from the first channel, so earlier
//! channels may deliver the same notification more than once.

use std::sync::Arc;

use huddle_common::types::ClaimedNotification;

use crate::channels::{ChannelSender, DeliveryError};

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of channels the notification was handed to.
    pub sent: usize,
}

#[derive(Default)]
pub struct FanOutDispatcher {
    senders: Vec<Arc<dyn ChannelSender>>,
}

impl FanOutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        tracing::info!(channel = %sender.channel_kind(), "Channel sender registered");
        self.senders.push(sender);
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    pub async fn send(&self, claimed: &ClaimedNotification) -> Result<DispatchReport, DeliveryError> {
        let item = &claimed.item;
        let mut report = DispatchReport::default();

        let Some(preferences) = claimed.preferences.as_ref() else {
            tracing::info!(
                notification_id = %item.id,
                user_id = %item.user_id,
                "No address found: recipient has no notification preferences"
            );
            return Ok(report);
        };

        for sender in &self.senders {
            let kind = sender.channel_kind();
            let Some(address) = preferences.delivery_address(kind) else {
                continue;
            };

            sender
                .send(address, &item.payload.topic, &item.payload.message)
                .await
                .inspect_err(|e| {
                    tracing::warn!(
                        notification_id = %item.id,
                        channel = %kind,
                        error = %e,
                        "Channel delivery failed"
                    );
                })?;

            tracing::debug!(notification_id = %item.id, channel = %kind, "Delivered on channel");
            report.sent += 1;
        }

        if report.sent == 0 {
            tracing::info!(
                notification_id = %item.id,
                user_id = %item.user_id,
                channels = preferences.channels.bits(),
                "No address found for any enabled channel"
            );
        }

        Ok(report)
    }
}
