//! In-process runtime over an in-memory database for router tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use callhook_agent::extraction::HeuristicExtractor;
use callhook_agent::{ConversationRuntime, RuntimePorts, RuntimeSettings};
use callhook_core::channel::LineType;
use callhook_core::clock::FixedClock;
use callhook_core::domain::business::{Business, BusinessHours, BusinessId};
use callhook_core::domain::conversation::Conversation;
use callhook_core::domain::lead::Lead;
use callhook_core::notifications::NotificationPrefs;
use callhook_core::ports::{
    EmailSender, GeneratedReply, IntegrationError, LineTypeLookup, ReplyContext, ReplyGenerator,
    SentSms, SmsSender, VoiceAgent, VoiceTransfer,
};
use callhook_db::repositories::{BusinessRepository, SqlBusinessRepository};
use callhook_db::{connect_with_settings, migrations, Repositories};

use crate::operator::OperatorState;
use crate::webhooks::WebhookState;

pub const CALLER: &str = "+15551234567";
pub const TWILIO: &str = "+15557654321";
pub const BUSINESS_ID: &str = "biz-1";

fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}

#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<(String, String, String)>>,
    counter: AtomicU32,
}

impl Outbox {
    pub fn to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .expect("outbox lock")
            .iter()
            .filter(|(to, _, _)| to == phone)
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub fn last_sid(&self) -> Option<String> {
        match self.counter.load(Ordering::SeqCst) {
            0 => None,
            n => Some(format!("SMout{n:04}")),
        }
    }
}

#[async_trait]
impl SmsSender for Outbox {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SentSms, IntegrationError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().expect("outbox lock").push((
            to.to_string(),
            from.to_string(),
            body.to_string(),
        ));
        Ok(SentSms { provider_sid: format!("SMout{n:04}") })
    }
}

struct Silent;

#[async_trait]
impl EmailSender for Silent {
    async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), IntegrationError> {
        Ok(())
    }
}

#[async_trait]
impl LineTypeLookup for Silent {
    async fn lookup_line_type(&self, _phone: &str) -> LineType {
        LineType::Mobile
    }
}

#[async_trait]
impl ReplyGenerator for Silent {
    async fn generate_reply(&self, _context: ReplyContext<'_>) -> Result<GeneratedReply, IntegrationError> {
        Ok(GeneratedReply { text: "Thanks! What's the address?".to_string(), signals: Vec::new() })
    }
}

struct AnsweringVoice;

#[async_trait]
impl VoiceAgent for AnsweringVoice {
    async fn place_or_transfer_call(&self, _transfer: &VoiceTransfer) -> Result<String, IntegrationError> {
        Ok("vapi-call-1".to_string())
    }
}

pub fn business(voice_assistant_id: Option<&str>) -> Business {
    let now = ts("2026-03-01T12:00:00Z");
    Business {
        id: BusinessId(BUSINESS_ID.to_string()),
        name: "Cool Breeze HVAC".to_string(),
        owner_name: "Dana".to_string(),
        owner_email: "dana@example.com".to_string(),
        owner_phone: "+15550000001".to_string(),
        business_phone: "+15550000002".to_string(),
        twilio_number: TWILIO.to_string(),
        timezone: "America/New_York".to_string(),
        business_hours: BusinessHours::default(),
        avg_job_value: Decimal::new(350, 0),
        ai_greeting: None,
        ai_instructions: None,
        notification_prefs: NotificationPrefs::default(),
        google_place_id: None,
        voice_assistant_id: voice_assistant_id.map(str::to_string),
        calendar_refresh_token: None,
        created_at: now,
        updated_at: now,
    }
}

pub struct TestApp {
    pub runtime: Arc<ConversationRuntime>,
    pub repos: Repositories,
    pub sms: Arc<Outbox>,
    pub business: Business,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(business(None), RuntimeSettings::default()).await
    }

    pub async fn with_voice_ai() -> Self {
        let settings = RuntimeSettings { voice_ai_enabled: true, ..RuntimeSettings::default() };
        Self::build(business(Some("assistant-1")), settings).await
    }

    async fn build(business: Business, settings: RuntimeSettings) -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        SqlBusinessRepository::new(pool.clone()).save(&business).await.expect("seed business");

        let sms = Arc::new(Outbox::default());
        let ports = RuntimePorts {
            sms: sms.clone(),
            email: Arc::new(Silent),
            lookup: Arc::new(Silent),
            voice: Arc::new(AnsweringVoice),
            replies: Arc::new(Silent),
            extractor: Arc::new(HeuristicExtractor::new().expect("extractor regexes")),
            calendar: None,
        };
        let repos = Repositories::sqlite(pool);
        // Wednesday midday in New York, inside default business hours.
        let clock = Arc::new(FixedClock::new(ts("2026-03-11T16:00:00Z")));
        let runtime = Arc::new(ConversationRuntime::new(repos.clone(), ports, settings, clock));
        Self { runtime, repos, sms, business }
    }

    pub fn webhooks(&self) -> WebhookState {
        WebhookState::new(self.runtime.clone(), "https://hooks.example.com/")
    }

    pub fn operator(&self) -> OperatorState {
        OperatorState::new(self.runtime.clone())
    }

    pub async fn lead(&self) -> Lead {
        self.repos
            .leads
            .find_by_phone(&self.business.id, CALLER)
            .await
            .expect("lead lookup")
            .expect("lead exists")
    }

    pub async fn latest_conversation(&self) -> Conversation {
        let lead = self.lead().await;
        self.repos
            .conversations
            .find_latest_for_lead(&self.business.id, &lead.id)
            .await
            .expect("conversation lookup")
            .expect("conversation exists")
    }
}
