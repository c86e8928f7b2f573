//! Allow-listed partial updates for operator edits. Each patch names exactly the
//! mutable fields of its entity and rejects anything else at deserialization.

use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::appointment::{Appointment, AppointmentStatus};
use crate::domain::business::{hhmm, Business, BusinessHours};
use crate::domain::lead::{Lead, LeadStatus, Urgency};
use crate::notifications::NotificationPrefs;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch contains no fields")]
    Empty,
    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeadPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub service_needed: Option<String>,
    pub urgency: Option<Urgency>,
    pub status: Option<LeadStatus>,
    pub notes: Option<String>,
    pub preferred_time: Option<String>,
    pub estimated_value: Option<Decimal>,
}

impl LeadPatch {
    /// Operator edits overwrite; unlike extraction they are authoritative.
    pub fn apply(&self, lead: &mut Lead) -> Result<Vec<&'static str>, PatchError> {
        if let Some(email) = self.email.as_deref() {
            if !email.trim().is_empty() && !email.contains('@') {
                return Err(PatchError::InvalidValue {
                    field: "email",
                    message: format!("`{email}` is not an email address"),
                });
            }
        }
        if let Some(value) = self.estimated_value {
            if value.is_sign_negative() {
                return Err(PatchError::InvalidValue {
                    field: "estimated_value",
                    message: "must not be negative".to_owned(),
                });
            }
        }

        let mut changed = Vec::new();
        set_text(&mut lead.name, &self.name, "name", &mut changed);
        set_text(&mut lead.email, &self.email, "email", &mut changed);
        set_text(&mut lead.address, &self.address, "address", &mut changed);
        set_text(&mut lead.service_needed, &self.service_needed, "service_needed", &mut changed);
        set_text(&mut lead.notes, &self.notes, "notes", &mut changed);
        set_text(&mut lead.preferred_time, &self.preferred_time, "preferred_time", &mut changed);
        if let Some(urgency) = self.urgency {
            lead.urgency = Some(urgency);
            changed.push("urgency");
        }
        if let Some(status) = self.status {
            lead.status = status;
            changed.push("status");
        }
        if let Some(value) = self.estimated_value {
            lead.estimated_value = Some(value);
            changed.push("estimated_value");
        }

        if changed.is_empty() {
            return Err(PatchError::Empty);
        }
        Ok(changed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppointmentPatch {
    pub status: Option<AppointmentStatus>,
    pub scheduled_date: Option<NaiveDate>,
    /// `HH:MM`
    pub scheduled_time: Option<String>,
    pub notes: Option<String>,
}

impl AppointmentPatch {
    pub fn apply(&self, appointment: &mut Appointment) -> Result<Vec<&'static str>, PatchError> {
        let time = match self.scheduled_time.as_deref() {
            Some(raw) => Some(hhmm::parse(raw).ok_or_else(|| PatchError::InvalidValue {
                field: "scheduled_time",
                message: format!("`{raw}` is not an HH:MM time"),
            })?),
            None => None,
        };

        let mut changed = Vec::new();
        if let Some(status) = self.status {
            appointment.status = status;
            changed.push("status");
        }
        if let Some(date) = self.scheduled_date {
            appointment.scheduled_date = date;
            changed.push("scheduled_date");
        }
        if let Some(time) = time {
            appointment.scheduled_time = time;
            changed.push("scheduled_time");
        }
        set_text(&mut appointment.notes, &self.notes, "notes", &mut changed);

        if changed.is_empty() {
            return Err(PatchError::Empty);
        }
        Ok(changed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub ai_greeting: Option<String>,
    pub ai_instructions: Option<String>,
    pub avg_job_value: Option<Decimal>,
    pub notification_prefs: Option<NotificationPrefs>,
    pub business_hours: Option<BusinessHours>,
    pub timezone: Option<String>,
}

impl SettingsPatch {
    pub fn apply(&self, business: &mut Business) -> Result<Vec<&'static str>, PatchError> {
        if let Some(value) = self.avg_job_value {
            if value <= Decimal::ZERO {
                return Err(PatchError::InvalidValue {
                    field: "avg_job_value",
                    message: "must be positive".to_owned(),
                });
            }
        }
        if let Some(zone) = self.timezone.as_deref() {
            if zone.trim().parse::<Tz>().is_err() {
                return Err(PatchError::InvalidValue {
                    field: "timezone",
                    message: format!("`{zone}` is not an IANA time zone"),
                });
            }
        }
        if let Some(hours) = &self.business_hours {
            if let Some((day, _)) = hours.0.iter().find(|(day, _)| !is_weekday_key(day)) {
                return Err(PatchError::InvalidValue {
                    field: "business_hours",
                    message: format!("unknown day `{day}`"),
                });
            }
            if let Some((day, _)) =
                hours.0.iter().find(|(_, slot)| slot.is_some_and(|slot| slot.open > slot.close))
            {
                return Err(PatchError::InvalidValue {
                    field: "business_hours",
                    message: format!("{day} opens after it closes"),
                });
            }
        }

        let mut changed = Vec::new();
        set_text(&mut business.ai_greeting, &self.ai_greeting, "ai_greeting", &mut changed);
        set_text(
            &mut business.ai_instructions,
            &self.ai_instructions,
            "ai_instructions",
            &mut changed,
        );
        if let Some(value) = self.avg_job_value {
            business.avg_job_value = value;
            changed.push("avg_job_value");
        }
        if let Some(prefs) = self.notification_prefs {
            business.notification_prefs = prefs;
            changed.push("notification_prefs");
        }
        if let Some(hours) = &self.business_hours {
            business.business_hours = hours.clone();
            changed.push("business_hours");
        }
        if let Some(zone) = self.timezone.as_deref() {
            business.timezone = zone.trim().to_string();
            changed.push("timezone");
        }

        if changed.is_empty() {
            return Err(PatchError::Empty);
        }
        Ok(changed)
    }
}

/// An empty string clears the field.
fn set_text(
    slot: &mut Option<String>,
    value: &Option<String>,
    field: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if let Some(value) = value {
        let trimmed = value.trim();
        *slot = (!trimmed.is_empty()).then(|| trimmed.to_string());
        changed.push(field);
    }
}

fn is_weekday_key(day: &str) -> bool {
    matches!(
        day,
        "monday" | "tuesday" | "wednesday" | "thursday" | "friday" | "saturday" | "sunday"
    )
}
