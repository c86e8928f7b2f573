//! Owner notification decisions: which channels fire for an event and what
//! the message says. Delivery itself lives behind the outbound ports.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::domain::business::hhmm;
use crate::domain::lead::LeadId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    #[serde(default = "enabled")]
    pub sms: bool,
    #[serde(default = "enabled")]
    pub email: bool,
    #[serde(with = "hhmm", default = "default_quiet_start")]
    pub quiet_start: NaiveTime,
    #[serde(with = "hhmm", default = "default_quiet_end")]
    pub quiet_end: NaiveTime,
}

fn enabled() -> bool {
    true
}

fn default_quiet_start() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default()
}

fn default_quiet_end() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            sms: true,
            email: true,
            quiet_start: default_quiet_start(),
            quiet_end: default_quiet_end(),
        }
    }
}

impl NotificationPrefs {
    /// Both bounds are inclusive. A window whose start is after its end wraps midnight.
    pub fn in_quiet_hours(&self, local: NaiveTime) -> bool {
        if self.quiet_start <= self.quiet_end {
            self.quiet_start <= local && local <= self.quiet_end
        } else {
            local >= self.quiet_start || local <= self.quiet_end
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    MissedCall,
    QualifiedLead,
    AppointmentBooked,
    Emergency,
    HumanNeeded,
    NewMessage,
    OwnerNudge,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedCall => "missed_call",
            Self::QualifiedLead => "qualified_lead",
            Self::AppointmentBooked => "appointment_booked",
            Self::Emergency => "emergency",
            Self::HumanNeeded => "human_needed",
            Self::NewMessage => "new_message",
            Self::OwnerNudge => "owner_nudge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "missed_call" => Some(Self::MissedCall),
            "qualified_lead" => Some(Self::QualifiedLead),
            "appointment_booked" => Some(Self::AppointmentBooked),
            "emergency" => Some(Self::Emergency),
            "human_needed" => Some(Self::HumanNeeded),
            "new_message" => Some(Self::NewMessage),
            "owner_nudge" => Some(Self::OwnerNudge),
            _ => None,
        }
    }

    pub fn bypasses_quiet_hours(&self) -> bool {
        matches!(self, Self::Emergency)
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::MissedCall => "Missed call",
            Self::QualifiedLead => "New qualified lead",
            Self::AppointmentBooked => "Appointment booked",
            Self::Emergency => "EMERGENCY lead",
            Self::HumanNeeded => "Conversation needs a human",
            Self::NewMessage => "New message",
            Self::OwnerNudge => "Lead waiting for a callback",
        }
    }
}

/// Event details rendered into the owner message and kept for the audit trail.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<LeadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_hours: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NotificationData {
    pub fn for_phone(phone: impl Into<String>) -> Self {
        Self { phone: Some(phone.into()), ..Self::default() }
    }

    pub fn with_lead(mut self, lead_id: LeadId, lead_name: Option<String>) -> Self {
        self.lead_id = Some(lead_id);
        self.lead_name = lead_name;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

pub fn render(event: NotificationEvent, data: &NotificationData) -> RenderedNotification {
    let phone = format_phone(data.phone.as_deref().unwrap_or_default());
    let body = match event {
        NotificationEvent::MissedCall => {
            format!("Missed call from {phone}. AI is following up now.")
        }
        NotificationEvent::QualifiedLead => {
            "New qualified lead! Check your dashboard for details.".to_string()
        }
        NotificationEvent::AppointmentBooked => {
            "New appointment booked! Check your dashboard.".to_string()
        }
        NotificationEvent::Emergency => {
            "EMERGENCY lead! Check your dashboard and call them immediately.".to_string()
        }
        NotificationEvent::HumanNeeded => {
            "AI needs help with a conversation. Please check the dashboard.".to_string()
        }
        NotificationEvent::NewMessage => format!("New message from {phone}"),
        NotificationEvent::OwnerNudge => {
            let lead = data
                .lead_name
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .map(str::to_string)
                .unwrap_or(phone);
            format!("Reminder: {lead} is qualified and waiting for a callback.")
        }
    };
    RenderedNotification { subject: format!("CallHook: {}", event.subject()), body }
}

/// `+1XXXXXXXXXX` becomes `(XXX) XXX-XXXX`; anything else is returned unchanged.
pub fn format_phone(phone: &str) -> String {
    match phone.strip_prefix("+1") {
        Some(digits) if digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit()) => {
            format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
        }
        _ => phone.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub sms: bool,
    pub email: bool,
}

impl DeliveryPlan {
    pub fn is_empty(&self) -> bool {
        !self.sms && !self.email
    }
}

/// SMS honours quiet hours unless the event bypasses them; email never does.
pub fn plan_delivery(
    prefs: &NotificationPrefs,
    event: NotificationEvent,
    local_time: NaiveTime,
) -> DeliveryPlan {
    let quiet = prefs.in_quiet_hours(local_time) && !event.bypasses_quiet_hours();
    DeliveryPlan { sms: prefs.sms && !quiet, email: prefs.email }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::{
        format_phone, plan_delivery, render, DeliveryPlan, NotificationData, NotificationEvent,
        NotificationPrefs,
    };

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let prefs = NotificationPrefs::default();
        assert!(prefs.in_quiet_hours(at(23, 0)));
        assert!(prefs.in_quiet_hours(at(3, 15)));
        assert!(prefs.in_quiet_hours(at(21, 0)));
        assert!(prefs.in_quiet_hours(at(7, 0)));
        assert!(!prefs.in_quiet_hours(at(12, 0)));
        assert!(!prefs.in_quiet_hours(at(7, 1)));
    }

    #[test]
    fn same_day_window_is_inclusive() {
        let prefs = NotificationPrefs { quiet_start: at(12, 0), quiet_end: at(13, 0), ..Default::default() };
        assert!(prefs.in_quiet_hours(at(12, 0)));
        assert!(prefs.in_quiet_hours(at(13, 0)));
        assert!(!prefs.in_quiet_hours(at(23, 0)));
    }

    #[test]
    fn emergency_sms_ignores_quiet_hours() {
        let prefs = NotificationPrefs::default();
        assert_eq!(
            plan_delivery(&prefs, NotificationEvent::MissedCall, at(23, 0)),
            DeliveryPlan { sms: false, email: true }
        );
        assert_eq!(
            plan_delivery(&prefs, NotificationEvent::Emergency, at(23, 0)),
            DeliveryPlan { sms: true, email: true }
        );
        assert_eq!(
            plan_delivery(&prefs, NotificationEvent::MissedCall, at(12, 0)),
            DeliveryPlan { sms: true, email: true }
        );
    }

    #[test]
    fn disabled_channels_stay_disabled() {
        let prefs = NotificationPrefs { sms: false, email: false, ..Default::default() };
        assert!(plan_delivery(&prefs, NotificationEvent::Emergency, at(12, 0)).is_empty());
    }

    #[test]
    fn templates_format_north_american_numbers() {
        assert_eq!(format_phone("+15551234567"), "(555) 123-4567");
        assert_eq!(format_phone("+445551234567"), "+445551234567");

        let rendered =
            render(NotificationEvent::MissedCall, &NotificationData::for_phone("+15551234567"));
        assert_eq!(rendered.body, "Missed call from (555) 123-4567. AI is following up now.");

        let nudge = render(
            NotificationEvent::OwnerNudge,
            &NotificationData { lead_name: Some("Pat".to_string()), ..Default::default() },
        );
        assert_eq!(nudge.body, "Reminder: Pat is qualified and waiting for a callback.");
    }

    #[test]
    fn prefs_deserialize_with_defaults() {
        let prefs: NotificationPrefs =
            serde_json::from_str(r#"{"sms":false,"quiet_start":"22:30"}"#).expect("prefs");
        assert!(!prefs.sms);
        assert!(prefs.email);
        assert_eq!(prefs.quiet_start, at(22, 30));
        assert_eq!(prefs.quiet_end, at(7, 0));
    }
}
