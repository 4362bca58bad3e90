use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a notification work item.
///
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Completed | NotificationStatus::Failed)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Completed => write!(f, "completed"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Delivery channel kinds. Discriminants are the on-disk bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email = 1,
    Sms = 2,
    Debug = 4,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Debug];

    pub fn bit(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Sms => write!(f, "sms"),
            ChannelKind::Debug => write!(f, "debug"),
        }
    }
}

/// Set of enabled channels, stored as the bit mask `Email=1 | SMS=2 | Debug=4`.
///
/// Unknown bits are preserved so newer channel kinds survive a round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet(u32);

impl ChannelSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, kind: ChannelKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn with(mut self, kind: ChannelKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Known channel kinds present in the set, in bit order.
    pub fn kinds(self) -> impl Iterator<Item = ChannelKind> {
        ChannelKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

/// Storage column conversion. A negative mask is not a valid encoding and
/// enables nothing.
impl From<i32> for ChannelSet {
    fn from(bits: i32) -> Self {
        Self(u32::try_from(bits).unwrap_or(0))
    }
}

impl FromIterator<ChannelKind> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = ChannelKind>>(iter: I) -> Self {
        iter.into_iter().fold(ChannelSet::empty(), ChannelSet::with)
    }
}

/// Opaque notification content. Only senders and renderers interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Subject line / title
    pub topic: String,
    /// Plain-text body
    pub message: String,
    /// Template key for renderers that format richer output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_type: Option<String>,
    /// Template variables
    #[serde(default)]
    pub template_data: serde_json::Map<String, serde_json::Value>,
}

impl NotificationPayload {
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            template_type: None,
            template_data: serde_json::Map::new(),
        }
    }

    fn templated(
        topic: String,
        message: String,
        template_type: &str,
        template_data: serde_json::Value,
    ) -> Self {
        let template_data = match template_data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            topic,
            message,
            template_type: Some(template_type.to_string()),
            template_data,
        }
    }

    /// Owner-facing notice that one of their events passed its deadline.
    pub fn event_expired(event_id: Uuid, event_title: Option<&str>) -> Self {
        let name = event_title
            .map(|t| format!("\"{}\"", t))
            .unwrap_or_else(|| "Your event".to_string());
        Self::templated(
            "Event expired".to_string(),
            format!(
                "{} has expired without being confirmed and is no longer open for join requests.",
                name
            ),
            "event_expired",
            serde_json::json!({ "event_id": event_id, "event_title": event_title }),
        )
    }

    /// Owner-facing notice that someone asked to join their event.
    pub fn join_request_received(event_id: Uuid, event_title: &str, requester_name: &str) -> Self {
        Self::templated(
            "New join request".to_string(),
            format!("{} wants to join \"{}\".", requester_name, event_title),
            "join_request_received",
            serde_json::json!({
                "event_id": event_id,
                "event_title": event_title,
                "requester_name": requester_name,
            }),
        )
    }

    /// Participant-facing notice that an event they joined is confirmed.
    pub fn event_confirmed(event_id: Uuid, event_title: &str, starts_at: DateTime<Utc>) -> Self {
        Self::templated(
            "Event confirmed".to_string(),
            format!(
                "\"{}\" is confirmed for {}.",
                event_title,
                starts_at.format("%Y-%m-%d %H:%M UTC")
            ),
            "event_confirmed",
            serde_json::json!({
                "event_id": event_id,
                "event_title": event_title,
                "starts_at": starts_at,
            }),
        )
    }
}

/// One queued unit of outbound notification work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationWorkItem {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(json)]
    pub payload: NotificationPayload,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "i32")]
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Per-user channel preferences, owned by the account layer and joined in at
/// claim time. Empty address strings mean "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserNotificationPreferences {
    pub user_id: Uuid,
    #[sqlx(try_from = "i32")]
    pub channels: ChannelSet,
    pub email: String,
    pub phone: String,
    pub debug_address: String,
}

impl UserNotificationPreferences {
    /// Address configured for `kind`, or `""` when none is.
    pub fn address_for(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Email => &self.email,
            ChannelKind::Sms => &self.phone,
            ChannelKind::Debug => &self.debug_address,
        }
    }

    /// Address to deliver on, only when the channel is enabled and configured.
    pub fn delivery_address(&self, kind: ChannelKind) -> Option<&str> {
        let address = self.address_for(kind);
        (self.channels.contains(kind) && !address.is_empty()).then_some(address)
    }
}

/// A work item taken by a worker, with the recipient's preferences attached.
///
/// `preferences` is `None` when the lookup found nothing or failed.
#[derive(Debug, Clone)]
pub struct ClaimedNotification {
    pub item: NotificationWorkItem,
    pub preferences: Option<UserNotificationPreferences>,
}

/// An event the entity layer has just flipped to expired, with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExpiredEvent {
    pub event_id: Uuid,
    pub user_id: Uuid,
    /// Display title, when the entity layer has one
    pub title: Option<String>,
}

/// Queue depth per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn record(&mut self, status: NotificationStatus, count: u64) {
        match status {
            NotificationStatus::Pending => self.pending += count,
            NotificationStatus::Processing => self.processing += count,
            NotificationStatus::Completed => self.completed += count,
            NotificationStatus::Failed => self.failed += count,
        }
    }
}
