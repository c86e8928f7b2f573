use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::notifications::NotificationPrefs;

string_id!(BusinessId);
string_id!(ServiceId);

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub owner_name: String,
    pub owner_email: String,
    pub owner_phone: String,
    pub business_phone: String,
    /// Provider number callers dial; resolves the tenant for inbound webhooks.
    pub twilio_number: String,
    pub timezone: String,
    pub business_hours: BusinessHours,
    pub avg_job_value: Decimal,
    pub ai_greeting: Option<String>,
    pub ai_instructions: Option<String>,
    pub notification_prefs: NotificationPrefs,
    pub google_place_id: Option<String>,
    pub voice_assistant_id: Option<String>,
    /// OAuth refresh token for the owner's calendar; never echoed back.
    #[serde(default, skip_serializing)]
    pub calendar_refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    /// Falls back to US Eastern when the stored zone name is not a known IANA zone.
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(DEFAULT_TIMEZONE)
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> DateTime<Tz> {
        at.with_timezone(&self.tz())
    }

    pub fn is_after_hours(&self, at: DateTime<Utc>) -> bool {
        let local = self.local_time(at);
        match self.business_hours.hours_for(local.weekday()) {
            Some(hours) => !hours.contains(local.time()),
            None => true,
        }
    }

    pub fn greeting(&self) -> String {
        match self.ai_greeting.as_deref().map(str::trim) {
            Some(greeting) if !greeting.is_empty() => greeting.to_string(),
            _ => format!(
                "Hey! Sorry we missed your call. This is {}. How can we help you today?",
                self.name
            ),
        }
    }

    pub fn review_link(&self) -> Option<String> {
        self.google_place_id
            .as_deref()
            .filter(|place_id| !place_id.trim().is_empty())
            .map(|place_id| {
                format!("https://search.google.com/local/writereview?placeid={place_id}")
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

impl DayHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.open <= time && time <= self.close
    }
}

/// Weekly opening hours keyed by lowercase English day name; a missing or
/// null day is closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessHours(pub BTreeMap<String, Option<DayHours>>);

impl BusinessHours {
    pub fn hours_for(&self, weekday: Weekday) -> Option<&DayHours> {
        self.0.get(weekday_key(weekday)).and_then(Option::as_ref)
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        let weekday = DayHours {
            open: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        };
        let mut days = BTreeMap::new();
        for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
            days.insert(day.to_string(), Some(weekday));
        }
        days.insert("saturday".to_string(), None);
        days.insert("sunday".to_string(), None);
        Self(days)
    }
}

fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub business_id: BusinessId,
    pub name: String,
    pub price: Option<Decimal>,
    pub duration_minutes: u32,
    pub is_bookable: bool,
    pub is_active: bool,
    pub sort_order: i32,
}

impl Service {
    pub fn is_quotable(&self) -> bool {
        self.is_active && self.is_bookable && self.price.is_some()
    }
}

/// `HH:MM` wall-clock encoding shared by business hours and quiet hours.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid HH:MM time `{raw}`")))
    }

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
    }
}
