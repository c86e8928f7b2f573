//! Google Calendar over the v3 REST API, authorised per business with a
//! stored OAuth refresh token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use callhook_core::config::CalendarConfig;
use callhook_core::domain::appointment::Appointment;
use callhook_core::domain::business::Business;
use callhook_core::domain::lead::Lead;
use callhook_core::ports::{BusyInterval, CalendarProvider, IntegrationError};

use super::{decode, rejected, transport};

const PROVIDER: &str = "google_calendar";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct EventResource {
    id: String,
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize)]
struct EventItem {
    status: Option<String>,
    start: EventTime,
    end: EventTime,
}

#[derive(Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<NaiveDate>,
}

impl EventTime {
    /// All-day events are read as midnight UTC.
    fn instant(&self) -> Option<DateTime<Utc>> {
        if let Some(raw) = self.date_time.as_deref() {
            return DateTime::parse_from_rfc3339(raw).ok().map(|value| value.with_timezone(&Utc));
        }
        self.date.and_then(|date| date.and_hms_opt(0, 0, 0)).map(|naive| naive.and_utc())
    }
}

pub struct GoogleCalendar {
    http: Client,
    client_id: String,
    client_secret: SecretString,
    calendar_id: String,
    token_url: String,
    api_base: String,
}

impl GoogleCalendar {
    /// `None` unless both OAuth client credentials are configured.
    pub fn from_config(http: Client, config: &CalendarConfig) -> Option<Self> {
        let client_id = config.google_client_id.clone()?;
        let client_secret = config.google_client_secret.clone()?;
        Some(Self {
            http,
            client_id,
            client_secret,
            calendar_id: config.calendar_id.clone(),
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
        })
    }

    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_base = api_base.into();
        self
    }

    async fn access_token(&self, business: &Business) -> Result<String, IntegrationError> {
        let refresh_token = business
            .calendar_refresh_token
            .as_deref()
            .ok_or(IntegrationError::NotConfigured { provider: PROVIDER })?;
        let payload = self.refresh_token(refresh_token).await?;
        serde_json::from_value::<TokenResponse>(payload)
            .map(|token| token.access_token)
            .map_err(|error| decode(PROVIDER, error))
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.api_base, self.calendar_id)
    }
}

fn event_body(business: &Business, appointment: &Appointment, lead: &Lead) -> Value {
    let start = appointment.scheduled_date.and_time(appointment.scheduled_time);
    let end = start + Duration::minutes(i64::from(appointment.duration_minutes));
    let service = appointment.service_type.as_deref().unwrap_or("Service call");

    let mut description = vec![format!("Phone: {}", lead.phone)];
    if let Some(address) = appointment.address.as_deref() {
        description.push(format!("Address: {address}"));
    }
    if let Some(notes) = appointment.notes.as_deref() {
        description.push(format!("Notes: {notes}"));
    }

    json!({
        "summary": format!("{service} - {}", lead.display_name()),
        "description": description.join("\n"),
        "location": appointment.address,
        "start": { "dateTime": start.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": business.timezone },
        "end": { "dateTime": end.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": business.timezone },
    })
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn create_event(
        &self,
        business: &Business,
        appointment: &Appointment,
        lead: &Lead,
    ) -> Result<String, IntegrationError> {
        let token = self.access_token(business).await?;
        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(token)
            .json(&event_body(business, appointment, lead))
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        let event: EventResource = response.json().await.map_err(|error| decode(PROVIDER, error))?;
        Ok(event.id)
    }

    async fn get_busy_times(
        &self,
        business: &Business,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, IntegrationError> {
        let token = self.access_token(business).await?;
        let time_min = start.to_rfc3339();
        let time_max = end.to_rfc3339();
        let response = self
            .http
            .get(self.events_url())
            .bearer_auth(token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", "250"),
            ])
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        let list: EventList = response.json().await.map_err(|error| decode(PROVIDER, error))?;
        Ok(list
            .items
            .into_iter()
            .filter(|item| item.status.as_deref() != Some("cancelled"))
            .filter_map(|item| {
                Some(BusyInterval { start: item.start.instant()?, end: item.end.instant()? })
            })
            .collect())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Value, IntegrationError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        response.json().await.map_err(|error| decode(PROVIDER, error))
    }
}
