use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

string_id!(LeadId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualifying,
    Qualified,
    Booked,
    Completed,
    Lost,
    Unresponsive,
    OptedOut,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualifying => "qualifying",
            Self::Qualified => "qualified",
            Self::Booked => "booked",
            Self::Completed => "completed",
            Self::Lost => "lost",
            Self::Unresponsive => "unresponsive",
            Self::OptedOut => "opted_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "qualifying" => Some(Self::Qualifying),
            "qualified" => Some(Self::Qualified),
            "booked" => Some(Self::Booked),
            "completed" | "converted" => Some(Self::Completed),
            "lost" => Some(Self::Lost),
            "unresponsive" => Some(Self::Unresponsive),
            "opted_out" => Some(Self::OptedOut),
            _ => None,
        }
    }

    /// Qualified or further along the sales path.
    pub fn has_converted(&self) -> bool {
        matches!(self, Self::Qualified | Self::Booked | Self::Completed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    MissedCall,
    Manual,
    Sms,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedCall => "missed_call",
            Self::Manual => "manual",
            Self::Sms => "sms",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "missed_call" => Some(Self::MissedCall),
            "manual" => Some(Self::Manual),
            "sms" => Some(Self::Sms),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Emergency,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" | "urgent" => Some(Self::High),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub business_id: BusinessId,
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub service_needed: Option<String>,
    pub urgency: Option<Urgency>,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub estimated_value: Option<Decimal>,
    pub preferred_time: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(
        business_id: BusinessId,
        phone: impl Into<String>,
        source: LeadSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LeadId::generate(),
            business_id,
            phone: phone.into(),
            name: None,
            email: None,
            address: None,
            service_needed: None,
            urgency: None,
            status: LeadStatus::New,
            source,
            estimated_value: None,
            preferred_time: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.trim().is_empty()).unwrap_or(&self.phone)
    }

    pub fn is_emergency(&self) -> bool {
        self.urgency == Some(Urgency::Emergency)
    }
}

pub(crate) fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::{LeadSource, LeadStatus, Urgency};

    #[test]
    fn lead_status_round_trips_from_storage_encoding() {
        let cases = [
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::Qualifying,
            LeadStatus::Qualified,
            LeadStatus::Booked,
            LeadStatus::Completed,
            LeadStatus::Lost,
            LeadStatus::Unresponsive,
            LeadStatus::OptedOut,
        ];

        for status in cases {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeadStatus::parse("converted"), Some(LeadStatus::Completed));
    }

    #[test]
    fn urgency_accepts_common_synonyms() {
        assert_eq!(Urgency::parse("URGENT"), Some(Urgency::High));
        assert_eq!(Urgency::parse(" emergency "), Some(Urgency::Emergency));
        assert_eq!(Urgency::parse("whenever"), None);
        assert!(Urgency::Emergency > Urgency::High);
    }

    #[test]
    fn lead_source_parses_known_values_only() {
        assert_eq!(LeadSource::parse("missed_call"), Some(LeadSource::MissedCall));
        assert_eq!(LeadSource::parse("walk_in"), None);
    }
}
