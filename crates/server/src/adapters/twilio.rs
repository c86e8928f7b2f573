//! Twilio Programmable Messaging and Lookup v2.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use callhook_core::channel::LineType;
use callhook_core::config::TwilioConfig;
use callhook_core::ports::{IntegrationError, LineTypeLookup, SentSms, SmsSender};

use super::{decode, rejected, transport};

const PROVIDER: &str = "twilio";
const API_BASE: &str = "https://api.twilio.com";
const LOOKUP_BASE: &str = "https://lookups.twilio.com";

#[derive(Clone)]
pub struct TwilioCredentials {
    account_sid: String,
    auth_token: SecretString,
}

impl TwilioCredentials {
    /// `None` unless both the account sid and auth token are present.
    pub fn from_config(config: &TwilioConfig) -> Option<Self> {
        match (&config.account_sid, &config.auth_token) {
            (Some(account_sid), Some(auth_token)) => {
                Some(Self { account_sid: account_sid.clone(), auth_token: auth_token.clone() })
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct MessageResource {
    sid: String,
}

pub struct TwilioSmsSender {
    http: Client,
    credentials: TwilioCredentials,
    api_base: String,
    status_callback: Option<String>,
}

impl TwilioSmsSender {
    pub fn new(http: Client, credentials: TwilioCredentials, status_callback: Option<String>) -> Self {
        Self { http, credentials, api_base: API_BASE.to_string(), status_callback }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SentSms, IntegrationError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.credentials.account_sid
        );
        let mut form = vec![("To", to), ("From", from), ("Body", body)];
        if let Some(callback) = self.status_callback.as_deref() {
            form.push(("StatusCallback", callback));
        }

        let response = self
            .http
            .post(url)
            .basic_auth(
                &self.credentials.account_sid,
                Some(self.credentials.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        let message: MessageResource =
            response.json().await.map_err(|error| decode(PROVIDER, error))?;
        Ok(SentSms { provider_sid: message.sid })
    }
}

/// Development transport: logs the text instead of sending it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlySmsSender;

#[async_trait]
impl SmsSender for LogOnlySmsSender {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SentSms, IntegrationError> {
        let provider_sid = format!("log-{}", Uuid::new_v4());
        info!(
            event_name = "sms.log_only.sent",
            to = %to,
            from = %from,
            body = %body,
            provider_sid = %provider_sid,
            "twilio not configured; sms logged"
        );
        Ok(SentSms { provider_sid })
    }
}

#[derive(Deserialize)]
struct PhoneNumberResource {
    line_type_intelligence: Option<LineTypeIntelligence>,
}

#[derive(Deserialize)]
struct LineTypeIntelligence {
    #[serde(rename = "type")]
    carrier_type: Option<String>,
}

pub struct TwilioLineTypeLookup {
    http: Client,
    credentials: Option<TwilioCredentials>,
    lookup_base: String,
}

impl TwilioLineTypeLookup {
    /// Without credentials every number is `Unknown`.
    pub fn new(http: Client, credentials: Option<TwilioCredentials>) -> Self {
        Self { http, credentials, lookup_base: LOOKUP_BASE.to_string() }
    }

    pub fn with_lookup_base(mut self, lookup_base: impl Into<String>) -> Self {
        self.lookup_base = lookup_base.into();
        self
    }

    async fn fetch(
        &self,
        credentials: &TwilioCredentials,
        phone: &str,
    ) -> Result<LineType, IntegrationError> {
        let url = format!("{}/v2/PhoneNumbers/{phone}", self.lookup_base);
        let response = self
            .http
            .get(url)
            .query(&[("Fields", "line_type_intelligence")])
            .basic_auth(&credentials.account_sid, Some(credentials.auth_token.expose_secret()))
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        let resource: PhoneNumberResource =
            response.json().await.map_err(|error| decode(PROVIDER, error))?;
        Ok(resource
            .line_type_intelligence
            .and_then(|intelligence| intelligence.carrier_type)
            .map(|carrier_type| LineType::from_carrier_type(&carrier_type))
            .unwrap_or_default())
    }
}

#[async_trait]
impl LineTypeLookup for TwilioLineTypeLookup {
    async fn lookup_line_type(&self, phone: &str) -> LineType {
        let Some(credentials) = &self.credentials else {
            return LineType::Unknown;
        };
        match self.fetch(credentials, phone).await {
            Ok(line_type) => line_type,
            Err(error) => {
                warn!(
                    event_name = "lookup.line_type.failed",
                    error = %error,
                    "line type lookup failed; treating as unknown"
                );
                LineType::Unknown
            }
        }
    }
}
