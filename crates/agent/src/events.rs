//! Transport-neutral inbound events. The server translates provider webhooks
//! into these before calling the runtime.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use callhook_core::domain::call::CallId;

/// First webhook of a call, before the business phone has been tried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCall {
    pub from: String,
    pub to: String,
    pub call_sid: String,
}

/// The business line did not pick up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundCall {
    pub from: String,
    pub to: String,
    pub call_sid: String,
    /// `None` lets the runtime compute it from business hours.
    pub is_after_hours: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundSms {
    pub from: String,
    pub to: String,
    pub body: String,
    pub message_sid: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceEndOfCall {
    /// Our call id, echoed back by the voice provider from the transfer metadata.
    pub call_id: Option<CallId>,
    pub provider_call_id: Option<String>,
    pub transcript: Vec<TranscriptLine>,
    pub structured_data: Value,
    pub duration_secs: Option<u32>,
    pub cost: Option<Decimal>,
    pub recording_url: Option<String>,
    pub ended_reason: Option<String>,
}

impl VoiceEndOfCall {
    pub fn joined_transcript(&self) -> String {
        self.transcript
            .iter()
            .filter(|line| !line.content.trim().is_empty())
            .map(|line| format!("{}: {}", line.role, line.content.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceFunctionCall {
    pub call_id: Option<CallId>,
    pub provider_call_id: Option<String>,
    pub name: String,
    pub params: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatusUpdate {
    pub message_sid: String,
    pub status: String,
}
