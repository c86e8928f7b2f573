#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use callhook_agent::extraction::HeuristicExtractor;
use callhook_agent::{
    ConversationRuntime, InboundCall, InboundSms, MissedCallOutcome, RuntimePorts,
    RuntimeSettings, SchedulerWorker, SmsOutcome,
};
use callhook_core::channel::LineType;
use callhook_core::clock::FixedClock;
use callhook_core::config::SchedulerConfig;
use callhook_core::domain::business::{Business, BusinessHours, BusinessId, Service, ServiceId};
use callhook_core::domain::conversation::Conversation;
use callhook_core::domain::lead::Lead;
use callhook_core::notifications::NotificationPrefs;
use callhook_core::ports::{
    EmailSender, GeneratedReply, IntegrationError, LineTypeLookup, ReplyContext, ReplyGenerator,
    SentSms, SmsSender, VoiceAgent, VoiceTransfer,
};
use callhook_db::repositories::{BusinessRepository, SqlBusinessRepository};
use callhook_db::{connect_with_settings, migrations, Repositories};

pub const CALLER: &str = "+15551234567";
pub const OWNER: &str = "+15550000001";
pub const TWILIO: &str = "+15557654321";

/// Wednesday 2026-03-11 12:00 in New York.
pub fn midday() -> DateTime<Utc> {
    ts("2026-03-11T16:00:00Z")
}

pub fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentText {
    pub to: String,
    pub from: String,
    pub body: String,
}

#[derive(Default)]
pub struct SmsOutbox {
    sent: Mutex<Vec<SentText>>,
    failing: AtomicBool,
    counter: AtomicU32,
}

impl SmsOutbox {
    pub fn to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .expect("outbox lock")
            .iter()
            .filter(|text| text.to == phone)
            .map(|text| text.body.clone())
            .collect()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SmsSender for SmsOutbox {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SentSms, IntegrationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntegrationError::Transport {
                provider: "twilio",
                message: "connection reset".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().expect("outbox lock").push(SentText {
            to: to.to_string(),
            from: from.to_string(),
            body: body.to_string(),
        });
        Ok(SentSms { provider_sid: format!("SMout{n:04}") })
    }
}

#[derive(Default)]
pub struct EmailOutbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl EmailOutbox {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().expect("email lock").iter().map(|(subject, _)| subject.clone()).collect()
    }
}

#[async_trait]
impl EmailSender for EmailOutbox {
    async fn send_email(&self, _to: &str, subject: &str, body: &str) -> Result<(), IntegrationError> {
        self.sent.lock().expect("email lock").push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct StaticLookup(Mutex<LineType>);

impl StaticLookup {
    pub fn set(&self, line_type: LineType) {
        *self.0.lock().expect("lookup lock") = line_type;
    }
}

#[async_trait]
impl LineTypeLookup for StaticLookup {
    async fn lookup_line_type(&self, _phone: &str) -> LineType {
        *self.0.lock().expect("lookup lock")
    }
}

/// Refuses transfers unless given a provider call id.
#[derive(Default)]
pub struct VoiceStub {
    provider_call_id: Mutex<Option<String>>,
    transfers: Mutex<Vec<VoiceTransfer>>,
}

impl VoiceStub {
    pub fn answer_with(&self, provider_call_id: &str) {
        *self.provider_call_id.lock().expect("voice lock") = Some(provider_call_id.to_string());
    }

    pub fn transfers(&self) -> Vec<VoiceTransfer> {
        self.transfers.lock().expect("voice lock").clone()
    }
}

#[async_trait]
impl VoiceAgent for VoiceStub {
    async fn place_or_transfer_call(&self, transfer: &VoiceTransfer) -> Result<String, IntegrationError> {
        self.transfers.lock().expect("voice lock").push(transfer.clone());
        self.provider_call_id
            .lock()
            .expect("voice lock")
            .clone()
            .ok_or(IntegrationError::NotConfigured { provider: "vapi" })
    }
}

/// Plays queued replies in order, then a plain acknowledgement.
#[derive(Default)]
pub struct ScriptedReplies {
    queue: Mutex<VecDeque<Result<GeneratedReply, IntegrationError>>>,
    calls: AtomicU32,
}

impl ScriptedReplies {
    pub fn push(&self, reply: Result<GeneratedReply, IntegrationError>) {
        self.queue.lock().expect("reply lock").push_back(reply);
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(GeneratedReply { text: text.to_string(), signals: Vec::new() }));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedReplies {
    async fn generate_reply(&self, _context: ReplyContext<'_>) -> Result<GeneratedReply, IntegrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().expect("reply lock").pop_front().unwrap_or_else(|| {
            Ok(GeneratedReply {
                text: "Got it! What's the address for the visit?".to_string(),
                signals: Vec::new(),
            })
        })
    }
}

pub fn business(voice_assistant_id: Option<&str>) -> Business {
    let now = ts("2026-03-01T12:00:00Z");
    Business {
        id: BusinessId("biz-1".to_string()),
        name: "Cool Breeze HVAC".to_string(),
        owner_name: "Dana".to_string(),
        owner_email: "dana@example.com".to_string(),
        owner_phone: OWNER.to_string(),
        business_phone: "+15550000002".to_string(),
        twilio_number: TWILIO.to_string(),
        timezone: "America/New_York".to_string(),
        business_hours: BusinessHours::default(),
        avg_job_value: Decimal::new(350, 0),
        ai_greeting: None,
        ai_instructions: None,
        notification_prefs: NotificationPrefs::default(),
        google_place_id: Some("ChIJ123".to_string()),
        voice_assistant_id: voice_assistant_id.map(str::to_string),
        calendar_refresh_token: None,
        created_at: now,
        updated_at: now,
    }
}

pub struct Harness {
    pub runtime: Arc<ConversationRuntime>,
    pub repos: Repositories,
    pub clock: Arc<FixedClock>,
    pub sms: Arc<SmsOutbox>,
    pub email: Arc<EmailOutbox>,
    pub lookup: Arc<StaticLookup>,
    pub voice: Arc<VoiceStub>,
    pub replies: Arc<ScriptedReplies>,
    pub business: Business,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(business(None), RuntimeSettings::default()).await
    }

    pub async fn with_voice_ai() -> Self {
        let settings = RuntimeSettings { voice_ai_enabled: true, ..RuntimeSettings::default() };
        Self::build(business(Some("assistant-1")), settings).await
    }

    pub async fn build(business: Business, settings: RuntimeSettings) -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        SqlBusinessRepository::new(pool.clone()).save(&business).await.expect("seed business");

        let clock = Arc::new(FixedClock::new(midday()));
        let sms = Arc::new(SmsOutbox::default());
        let email = Arc::new(EmailOutbox::default());
        let lookup = Arc::new(StaticLookup(Mutex::new(LineType::Mobile)));
        let voice = Arc::new(VoiceStub::default());
        let replies = Arc::new(ScriptedReplies::default());
        let ports = RuntimePorts {
            sms: sms.clone(),
            email: email.clone(),
            lookup: lookup.clone(),
            voice: voice.clone(),
            replies: replies.clone(),
            extractor: Arc::new(HeuristicExtractor::new().expect("extractor regexes")),
            calendar: None,
        };
        let repos = Repositories::sqlite(pool);
        let runtime =
            Arc::new(ConversationRuntime::new(repos.clone(), ports, settings, clock.clone()));
        Self { runtime, repos, clock, sms, email, lookup, voice, replies, business }
    }

    /// Adds an active, bookable service priced in whole dollars.
    pub async fn seed_service(&self, name: &str, price: i64) -> Service {
        let service = Service {
            id: ServiceId(format!("svc-{}", name.to_ascii_lowercase().replace(' ', "-"))),
            business_id: self.business.id.clone(),
            name: name.to_string(),
            price: Some(Decimal::new(price, 0)),
            duration_minutes: 60,
            is_bookable: true,
            is_active: true,
            sort_order: 0,
        };
        self.repos.businesses.save_service(&service).await.expect("seed service");
        service
    }

    pub fn worker(&self) -> SchedulerWorker {
        SchedulerWorker::new(
            self.repos.actions.clone(),
            self.runtime.clone(),
            &SchedulerConfig::default(),
            self.clock.clone(),
        )
        .with_worker_id("test-worker")
    }

    pub async fn missed_call(&self, call_sid: &str) -> MissedCallOutcome {
        self.runtime
            .handle_missed_call(InboundCall {
                from: CALLER.to_string(),
                to: TWILIO.to_string(),
                call_sid: call_sid.to_string(),
                is_after_hours: None,
            })
            .await
            .expect("missed call handled")
    }

    pub async fn text(&self, body: &str, message_sid: &str) -> SmsOutcome {
        self.runtime
            .handle_inbound_sms(InboundSms {
                from: CALLER.to_string(),
                to: TWILIO.to_string(),
                body: body.to_string(),
                message_sid: Some(message_sid.to_string()),
            })
            .await
            .expect("sms handled")
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
