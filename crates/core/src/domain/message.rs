use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;

string_id!(MessageId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Caller,
    Ai,
    Human,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Ai => "ai",
            Self::Human => "human",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "caller" => Some(Self::Caller),
            "ai" => Some(Self::Ai),
            "human" => Some(Self::Human),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Received,
    Queued,
    Sent,
    Delivered,
    Undelivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
            Self::Failed => "failed",
        }
    }

    /// Accepts provider callback spellings (`sending`, `accepted`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" | "receiving" => Some(Self::Received),
            "queued" | "accepted" | "scheduled" => Some(Self::Queued),
            "sent" | "sending" => Some(Self::Sent),
            "delivered" | "read" => Some(Self::Delivered),
            "undelivered" => Some(Self::Undelivered),
            "failed" | "canceled" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub sender_type: SenderType,
    pub body: String,
    pub status: DeliveryStatus,
    pub provider_sid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        conversation_id: ConversationId,
        body: impl Into<String>,
        provider_sid: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: Direction::Inbound,
            sender_type: SenderType::Caller,
            body: body.into(),
            status: DeliveryStatus::Received,
            provider_sid,
            created_at: now,
        }
    }

    pub fn outbound(
        conversation_id: ConversationId,
        sender_type: SenderType,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            direction: Direction::Outbound,
            sender_type,
            body: body.into(),
            status: DeliveryStatus::Queued,
            provider_sid: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus;

    #[test]
    fn provider_delivery_spellings_map_to_stored_status() {
        assert_eq!(DeliveryStatus::parse("sending"), Some(DeliveryStatus::Sent));
        assert_eq!(DeliveryStatus::parse("Delivered"), Some(DeliveryStatus::Delivered));
        assert_eq!(DeliveryStatus::parse("canceled"), Some(DeliveryStatus::Failed));
        assert_eq!(DeliveryStatus::parse("lost-in-space"), None);
    }
}
