use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use callhook_core::domain::message::{Direction, Message};
use callhook_core::ports::{
    GeneratedReply, IntegrationError, ReplyContext, ReplyGenerator, ReplySignal,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

const SIGNAL_TAGS: [(&str, ReplySignal); 3] = [
    ("[QUALIFIED]", ReplySignal::Qualified),
    ("[HUMAN_NEEDED]", ReplySignal::HumanNeeded),
    ("[EMERGENCY]", ReplySignal::Emergency),
];

/// Strips signal tags out of a model reply and collects them in tag order.
pub fn parse_reply(raw: &str) -> GeneratedReply {
    let mut text = raw.to_string();
    let mut signals = Vec::new();
    for (tag, signal) in SIGNAL_TAGS {
        if text.contains(tag) {
            text = text.replace(tag, "");
            signals.push(signal);
        }
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    GeneratedReply { text, signals }
}

fn system_prompt(context: &ReplyContext<'_>) -> String {
    let business = context.business;
    let lead = context.lead;
    let local = business.local_time(context.now);
    let known = |label: &str, value: Option<&str>| match value {
        Some(value) if !value.trim().is_empty() => format!("- {label}: {value}\n"),
        _ => format!("- {label}: not yet known\n"),
    };

    let mut prompt = format!(
        "You are the text-message assistant for {name}, an HVAC company. A customer called, \
         nobody could pick up, and you are now texting them. Be warm, brief and practical. \
         Keep every reply under 300 characters and ask for one thing at a time.\n\n\
         Your goal is to learn the customer's name, the service they need and the service \
         address. Do not quote prices or promise an exact arrival time; the owner confirms \
         scheduling by phone.\n\n\
         Current local time: {time}.\n\nWhat we know so far:\n",
        name = business.name,
        time = local.format("%A %-I:%M %p"),
    );
    prompt.push_str(&known("name", lead.name.as_deref()));
    prompt.push_str(&known("service needed", lead.service_needed.as_deref()));
    prompt.push_str(&known("address", lead.address.as_deref()));
    prompt.push_str(&known("preferred time", lead.preferred_time.as_deref()));

    prompt.push_str(
        "\nAppend these tags to the end of your reply when they apply:\n\
         [QUALIFIED] once name, service and address are all known.\n\
         [HUMAN_NEEDED] when the customer asks for a person or you cannot help.\n\
         [EMERGENCY] for a gas smell, carbon monoxide alarm, smoke, flooding or any safety risk; \
         tell them to leave the home and call 911 if they are in danger.\n",
    );

    if let Some(instructions) =
        business.ai_instructions.as_deref().map(str::trim).filter(|text| !text.is_empty())
    {
        prompt.push_str("\nOwner instructions:\n");
        prompt.push_str(instructions);
        prompt.push('\n');
    }
    prompt
}

fn history_messages(history: &[Message]) -> impl Iterator<Item = ChatMessage> + '_ {
    history.iter().map(|message| match message.direction {
        Direction::Inbound => ChatMessage::user(message.body.clone()),
        Direction::Outbound => ChatMessage::assistant(message.body.clone()),
    })
}

/// Reply generation over any chat-completion backend.
pub struct LlmReplyGenerator {
    client: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
}

impl LlmReplyGenerator {
    pub fn new(client: Arc<dyn LlmClient>, max_tokens: u32, temperature: f32) -> Self {
        Self { client, max_tokens, temperature }
    }

    pub fn request(&self, context: &ReplyContext<'_>) -> CompletionRequest {
        let mut messages = vec![ChatMessage::system(system_prompt(context))];
        messages.extend(history_messages(context.history));
        messages.push(ChatMessage::user(context.inbound));
        CompletionRequest { messages, max_tokens: self.max_tokens, temperature: self.temperature }
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate_reply(
        &self,
        context: ReplyContext<'_>,
    ) -> Result<GeneratedReply, IntegrationError> {
        let request = self.request(&context);
        let raw = self.client.complete(&request).await.map_err(|error| {
            IntegrationError::Transport { provider: "llm", message: error.to_string() }
        })?;
        let reply = parse_reply(&raw);
        if reply.text.is_empty() && reply.signals.is_empty() {
            return Err(IntegrationError::Decode {
                provider: "llm",
                message: "completion contained no reply text".to_string(),
            });
        }
        debug!(
            event_name = "llm.reply.generated",
            lead_id = %context.lead.id,
            signals = ?reply.signals,
            "reply generated"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use callhook_core::domain::business::{Business, BusinessHours, BusinessId};
    use callhook_core::domain::conversation::ConversationId;
    use callhook_core::domain::lead::{Lead, LeadSource};
    use callhook_core::domain::message::{Message, SenderType};
    use callhook_core::notifications::NotificationPrefs;
    use callhook_core::ports::{ReplyContext, ReplyGenerator, ReplySignal};

    use super::{parse_reply, ChatRole, CompletionRequest, LlmClient, LlmReplyGenerator};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-11T14:00:00Z").expect("ts").with_timezone(&Utc)
    }

    fn business() -> Business {
        Business {
            id: BusinessId::from("biz"),
            name: "Cool Breeze HVAC".to_string(),
            owner_name: "Dana".to_string(),
            owner_email: "dana@example.com".to_string(),
            owner_phone: "+15550000001".to_string(),
            business_phone: "+15550000002".to_string(),
            twilio_number: "+15550000003".to_string(),
            timezone: "America/New_York".to_string(),
            business_hours: BusinessHours::default(),
            avg_job_value: Decimal::new(350, 0),
            ai_greeting: None,
            ai_instructions: Some("We do not service boilers.".to_string()),
            notification_prefs: NotificationPrefs::default(),
            google_place_id: None,
            voice_assistant_id: None,
            calendar_refresh_token: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<String> {
            self.requests.lock().expect("lock").push(request.clone());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn tags_are_stripped_and_collected() {
        let reply = parse_reply("Got it, a tech will call you shortly. [QUALIFIED]");
        assert_eq!(reply.text, "Got it, a tech will call you shortly.");
        assert_eq!(reply.signals, vec![ReplySignal::Qualified]);

        let both = parse_reply("[EMERGENCY] Please leave the house now. [HUMAN_NEEDED]");
        assert_eq!(both.text, "Please leave the house now.");
        assert!(both.has(ReplySignal::Emergency));
        assert!(both.has(ReplySignal::HumanNeeded));

        assert!(parse_reply("What's your address?").signals.is_empty());
    }

    #[tokio::test]
    async fn history_maps_onto_chat_roles_before_the_new_message() {
        let client = Arc::new(RecordingClient {
            reply: "Thanks! What's the address? ".to_string(),
            ..RecordingClient::default()
        });
        let generator = LlmReplyGenerator::new(client.clone(), 200, 0.7);
        let business = business();
        let lead = Lead::new(business.id.clone(), "+15551234567", LeadSource::MissedCall, now());
        let conversation = ConversationId::from("conv");
        let history = vec![
            Message::outbound(conversation.clone(), SenderType::Ai, business.greeting(), now()),
            Message::inbound(conversation, "my AC died", None, now()),
        ];

        let reply = generator
            .generate_reply(ReplyContext {
                business: &business,
                lead: &lead,
                history: &history,
                inbound: "I'm Pat",
                now: now(),
            })
            .await
            .expect("reply");
        assert_eq!(reply.text, "Thanks! What's the address?");

        let requests = client.requests.lock().expect("lock");
        let roles: Vec<_> = requests[0].messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::Assistant, ChatRole::User, ChatRole::User]
        );
        assert!(requests[0].messages[0].content.contains("Cool Breeze HVAC"));
        assert!(requests[0].messages[0].content.contains("We do not service boilers."));
        assert_eq!(requests[0].messages[3].content, "I'm Pat");
    }

    #[tokio::test]
    async fn blank_completions_are_rejected_but_bare_tags_are_kept() {
        let business = business();
        let lead = Lead::new(business.id.clone(), "+15551234567", LeadSource::Sms, now());
        let context = || ReplyContext {
            business: &business,
            lead: &lead,
            history: &[],
            inbound: "hello?",
            now: now(),
        };

        let blank = LlmReplyGenerator::new(
            Arc::new(RecordingClient { reply: "  ".to_string(), ..Default::default() }),
            200,
            0.7,
        );
        assert!(blank.generate_reply(context()).await.is_err());

        let tagged = LlmReplyGenerator::new(
            Arc::new(RecordingClient { reply: "[HUMAN_NEEDED]".to_string(), ..Default::default() }),
            200,
            0.7,
        );
        let reply = tagged.generate_reply(context()).await.expect("signal only");
        assert!(reply.text.is_empty());
        assert!(reply.has(ReplySignal::HumanNeeded));
    }
}
