//! Outbound capabilities the conversation runtime depends on. Adapters live in
//! the server crate; tests supply recording fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::channel::LineType;
use crate::domain::appointment::Appointment;
use crate::domain::business::Business;
use crate::domain::lead::Lead;
use crate::domain::message::Message;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("{provider} is not configured")]
    NotConfigured { provider: &'static str },
    #[error("{provider} transport failure: {message}")]
    Transport { provider: &'static str, message: String },
    #[error("{provider} rejected the request with status {status}: {message}")]
    Rejected { provider: &'static str, status: u16, message: String },
    #[error("{provider} returned an unreadable response: {message}")]
    Decode { provider: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentSms {
    pub provider_sid: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SentSms, IntegrationError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), IntegrationError>;
}

#[async_trait]
pub trait LineTypeLookup: Send + Sync {
    /// Implementations degrade to `LineType::Unknown` rather than failing.
    async fn lookup_line_type(&self, phone: &str) -> LineType;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTransfer {
    pub assistant_id: String,
    pub caller_phone: String,
    pub business_id: String,
    pub call_id: String,
    pub first_message: String,
}

#[async_trait]
pub trait VoiceAgent: Send + Sync {
    /// Places or transfers the caller to the voice assistant; returns the provider call id.
    async fn place_or_transfer_call(&self, transfer: &VoiceTransfer) -> Result<String, IntegrationError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySignal {
    Qualified,
    HumanNeeded,
    Emergency,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    pub signals: Vec<ReplySignal>,
}

impl GeneratedReply {
    pub fn has(&self, signal: ReplySignal) -> bool {
        self.signals.contains(&signal)
    }
}

pub struct ReplyContext<'a> {
    pub business: &'a Business,
    pub lead: &'a Lead,
    pub history: &'a [Message],
    pub inbound: &'a str,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, context: ReplyContext<'_>) -> Result<GeneratedReply, IntegrationError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn create_event(
        &self,
        business: &Business,
        appointment: &Appointment,
        lead: &Lead,
    ) -> Result<String, IntegrationError>;

    async fn get_busy_times(
        &self,
        business: &Business,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, IntegrationError>;

    /// Exchanges a refresh token for fresh credentials; the payload is provider specific.
    async fn refresh_token(&self, refresh_token: &str) -> Result<Value, IntegrationError>;
}
