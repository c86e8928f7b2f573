use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::business::BusinessId;
use crate::domain::call::CallId;
use crate::domain::lead::LeadId;

string_id!(ConversationId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    FollowUp,
    HumanActive,
    Qualified,
    ClosedUnresponsive,
    ClosedOptedOut,
}

impl ConversationStatus {
    pub const OPEN: [Self; 3] = [Self::Active, Self::FollowUp, Self::HumanActive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::FollowUp => "follow_up",
            Self::HumanActive => "human_active",
            Self::Qualified => "qualified",
            Self::ClosedUnresponsive => "closed_unresponsive",
            Self::ClosedOptedOut => "closed_opted_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "follow_up" => Some(Self::FollowUp),
            "human_active" => Some(Self::HumanActive),
            "qualified" => Some(Self::Qualified),
            "closed_unresponsive" => Some(Self::ClosedUnresponsive),
            "closed_opted_out" => Some(Self::ClosedOptedOut),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Open and not claimed by a human operator.
    pub fn is_automated(&self) -> bool {
        matches!(self, Self::Active | Self::FollowUp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Voice => "voice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sms" => Some(Self::Sms),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub business_id: BusinessId,
    pub lead_id: LeadId,
    pub call_id: Option<CallId>,
    pub status: ConversationStatus,
    pub channel: Channel,
    pub follow_up_count: u32,
    pub next_follow_up_at: Option<DateTime<Utc>>,
    /// Free-form scratch data: voice transcripts, raw extraction output.
    pub qualification_data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn open(
        business_id: BusinessId,
        lead_id: LeadId,
        call_id: Option<CallId>,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::generate(),
            business_id,
            lead_id,
            call_id,
            status: ConversationStatus::Active,
            channel,
            follow_up_count: 0,
            next_follow_up_at: None,
            qualification_data: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
