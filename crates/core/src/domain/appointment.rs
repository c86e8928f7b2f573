use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;
use crate::domain::conversation::ConversationId;
use crate::domain::lead::LeadId;

string_id!(AppointmentId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub business_id: BusinessId,
    pub lead_id: LeadId,
    pub conversation_id: Option<ConversationId>,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub duration_minutes: u32,
    pub service_type: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator input for booking an appointment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewAppointment {
    pub lead_id: LeadId,
    pub conversation_id: Option<ConversationId>,
    pub scheduled_date: NaiveDate,
    #[serde(with = "crate::domain::business::hhmm")]
    pub scheduled_time: NaiveTime,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    pub service_type: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

fn default_duration() -> u32 {
    60
}

impl Appointment {
    pub fn book(business_id: BusinessId, input: NewAppointment, now: DateTime<Utc>) -> Self {
        Self {
            id: AppointmentId::generate(),
            business_id,
            lead_id: input.lead_id,
            conversation_id: input.conversation_id,
            scheduled_date: input.scheduled_date,
            scheduled_time: input.scheduled_time,
            duration_minutes: input.duration_minutes,
            service_type: input.service_type,
            address: input.address,
            notes: input.notes,
            status: AppointmentStatus::Scheduled,
            calendar_event_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
