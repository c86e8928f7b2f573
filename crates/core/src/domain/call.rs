use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::channel::LineType;
use crate::domain::business::BusinessId;
use crate::domain::lead::LeadId;

string_id!(CallId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Answered,
    Missed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ringing" => Some(Self::Ringing),
            "answered" => Some(Self::Answered),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ringing)
    }
}

/// Fields filled asynchronously by the voice-AI end-of-call report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceDetails {
    pub provider_call_id: Option<String>,
    pub transcript: Option<String>,
    pub duration_secs: Option<u32>,
    pub cost: Option<Decimal>,
    pub recording_url: Option<String>,
    pub ended_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub business_id: BusinessId,
    pub lead_id: Option<LeadId>,
    pub call_sid: String,
    pub from_number: String,
    pub to_number: String,
    pub status: CallStatus,
    pub is_after_hours: bool,
    pub duration_secs: Option<u32>,
    pub line_type: Option<LineType>,
    pub voice: VoiceDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn ringing(
        business_id: BusinessId,
        call_sid: impl Into<String>,
        from_number: impl Into<String>,
        to_number: impl Into<String>,
        is_after_hours: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CallId::generate(),
            business_id,
            lead_id: None,
            call_sid: call_sid.into(),
            from_number: from_number.into(),
            to_number: to_number.into(),
            status: CallStatus::Ringing,
            is_after_hours,
            duration_secs: None,
            line_type: None,
            voice: VoiceDetails::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
