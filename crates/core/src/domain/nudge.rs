use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;
use crate::domain::lead::LeadId;

string_id!(OwnerNudgeId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeStatus {
    Pending,
    Sent,
    Acknowledged,
    Cancelled,
}

impl NudgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "acknowledged" => Some(Self::Acknowledged),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Reminder to the owner that a qualified lead is still waiting for a callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerNudge {
    pub id: OwnerNudgeId,
    pub business_id: BusinessId,
    pub lead_id: LeadId,
    pub status: NudgeStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OwnerNudge {
    pub fn pending(business_id: BusinessId, lead_id: LeadId, now: DateTime<Utc>) -> Self {
        Self {
            id: OwnerNudgeId::generate(),
            business_id,
            lead_id,
            status: NudgeStatus::Pending,
            sent_at: None,
            acknowledged_at: None,
            created_at: now,
        }
    }
}
