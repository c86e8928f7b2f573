//! Functions the voice assistant may call mid-call.

use serde::Deserialize;
use serde_json::Value;

use callhook_core::qualification::QualificationUpdate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceFunction {
    SaveLeadInfo,
    FlagEmergency,
    RequestHumanCallback,
}

impl VoiceFunction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "save_lead_info" => Some(Self::SaveLeadInfo),
            "flag_emergency" => Some(Self::FlagEmergency),
            "request_human_callback" => Some(Self::RequestHumanCallback),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SaveLeadInfo => "save_lead_info",
            Self::FlagEmergency => "flag_emergency",
            Self::RequestHumanCallback => "request_human_callback",
        }
    }

    /// Text handed back to the assistant once the function has run.
    pub fn result_message(&self) -> &'static str {
        match self {
            Self::SaveLeadInfo => "Lead info saved",
            Self::FlagEmergency => "Emergency flagged, owner notified",
            Self::RequestHumanCallback => "Human callback requested",
        }
    }
}

pub fn unknown_function_message(name: &str) -> String {
    format!("Unknown function: {name}")
}

#[derive(Debug, Default, Deserialize)]
struct ReasonParams {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Free-text reason the assistant gave, if any.
pub fn reason_from_params(params: &Value) -> Option<String> {
    let parsed: ReasonParams = serde_json::from_value(params.clone()).unwrap_or_default();
    parsed
        .reason
        .or(parsed.description)
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
}

pub fn lead_info_from_params(params: &Value) -> QualificationUpdate {
    QualificationUpdate::from_json(params)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{lead_info_from_params, reason_from_params, unknown_function_message, VoiceFunction};

    #[test]
    fn known_functions_round_trip_by_name() {
        for function in [
            VoiceFunction::SaveLeadInfo,
            VoiceFunction::FlagEmergency,
            VoiceFunction::RequestHumanCallback,
        ] {
            assert_eq!(VoiceFunction::parse(function.name()), Some(function));
        }
        assert_eq!(VoiceFunction::parse("book_appointment"), None);
        assert_eq!(unknown_function_message("book_appointment"), "Unknown function: book_appointment");
    }

    #[test]
    fn params_are_read_leniently() {
        assert_eq!(
            reason_from_params(&json!({ "description": " gas smell " })).as_deref(),
            Some("gas smell")
        );
        assert_eq!(reason_from_params(&json!("not an object")), None);

        let update = lead_info_from_params(&json!({ "name": "Pat", "urgency": 42 }));
        assert_eq!(update.name.as_deref(), Some("Pat"));
        assert_eq!(update.urgency, None);
    }
}
