//! Event handlers.
//!
//! Every handler has the same shape: take the (business, phone) lock, commit
//! lead and conversation state, release the lock, then perform the outbound
//! effects collected along the way. Network calls never run under the lock.

mod actions;
mod calls;
mod operator;
mod sms;
mod voice;

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{info, warn};

use callhook_core::audit::{AuditContext, AuditSink};
use callhook_core::channel::LineType;
use callhook_core::clock::Clock;
use callhook_core::config::{AppConfig, FollowUpConfig};
use callhook_core::domain::business::{Business, BusinessId, Service};
use callhook_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use callhook_core::domain::lead::{Lead, LeadId, LeadStatus, Urgency};
use callhook_core::domain::message::{DeliveryStatus, Message, SenderType};
use callhook_core::domain::nudge::{NudgeStatus, OwnerNudge};
use callhook_core::domain::scheduled::ActionKind;
use callhook_core::flows::{
    ConversationFlow, FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError,
    TransitionOutcome,
};
use callhook_core::notifications::{NotificationData, NotificationEvent};
use callhook_core::ports::{
    CalendarProvider, EmailSender, IntegrationError, LineTypeLookup, ReplyGenerator, SmsSender,
    VoiceAgent,
};
use callhook_core::qualification::promote;
use callhook_core::scheduling::{FollowUpPolicy, ReviewPolicy};
use callhook_db::Repositories;

use crate::audit::TracingAuditSink;
use crate::error::RuntimeError;
use crate::extraction::QualificationExtractor;
use crate::guardrails::{GuardrailPolicy, MessageKind, OutboundIntent};
use crate::locks::KeyedLocks;
use crate::notify::NotificationDispatcher;
use crate::scheduler::DelayedActionScheduler;

pub use calls::{IncomingCallOutcome, MissedCallDisposition, MissedCallOutcome};
pub use sms::{SmsDisposition, SmsOutcome};
pub use voice::{VoiceReportDisposition, VoiceReportOutcome};

const ACTOR: &str = "conversation-runtime";

/// Outbound collaborators, constructed by the process entry point.
#[derive(Clone)]
pub struct RuntimePorts {
    pub sms: Arc<dyn SmsSender>,
    pub email: Arc<dyn EmailSender>,
    pub lookup: Arc<dyn LineTypeLookup>,
    pub voice: Arc<dyn VoiceAgent>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub extractor: Arc<dyn QualificationExtractor>,
    /// Absent when no calendar integration is configured.
    pub calendar: Option<Arc<dyn CalendarProvider>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub voice_ai_enabled: bool,
    pub follow_up: FollowUpPolicy,
    pub review: ReviewPolicy,
    pub owner_nudge_delay: Duration,
    /// Messages of history handed to the reply generator.
    pub history_limit: u32,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            voice_ai_enabled: config.voice_ai.enabled,
            ..Self::from_follow_up(&config.follow_up)
        }
    }

    fn from_follow_up(config: &FollowUpConfig) -> Self {
        Self {
            voice_ai_enabled: false,
            follow_up: FollowUpPolicy::from_config(config),
            review: ReviewPolicy::from_config(config),
            owner_nudge_delay: Duration::minutes(i64::from(config.owner_nudge_delay_minutes)),
            history_limit: 20,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_follow_up(&FollowUpConfig::default())
    }
}

pub struct ConversationRuntime {
    repos: Repositories,
    ports: RuntimePorts,
    settings: RuntimeSettings,
    scheduler: DelayedActionScheduler,
    notifier: NotificationDispatcher,
    flow: FlowEngine<ConversationFlow>,
    guard: GuardrailPolicy,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl ConversationRuntime {
    pub fn new(
        repos: Repositories,
        ports: RuntimePorts,
        settings: RuntimeSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = DelayedActionScheduler::new(repos.actions.clone(), clock.clone());
        let notifier = NotificationDispatcher::new(ports.sms.clone(), ports.email.clone());
        Self {
            repos,
            ports,
            settings,
            scheduler,
            notifier,
            flow: FlowEngine::default(),
            guard: GuardrailPolicy::default(),
            locks: KeyedLocks::new(),
            clock,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &DelayedActionScheduler {
        &self.scheduler
    }

    /// Applies `event` to the conversation and the lead-side actions it implies.
    /// Scheduling and notifications are left to [`Self::after_commit`].
    fn transition(
        &self,
        business: &Business,
        conversation: &mut Conversation,
        lead: &mut Lead,
        step: &Step<'_>,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let now = self.clock.now();
        let audit = AuditContext::new(
            Some(business.id.clone()),
            Some(conversation.id.clone()),
            step.correlation_id,
            ACTOR,
            now,
        );
        let context = FlowContext {
            follow_up_count: conversation.follow_up_count,
            sequence_len: self.settings.follow_up.sequence_len(),
        };
        let outcome = self.flow.apply_with_audit(
            &conversation.status,
            &step.event,
            &context,
            self.audit.as_ref(),
            &audit,
        )?;

        conversation.status = outcome.to;
        conversation.updated_at = now;
        for action in &outcome.actions {
            match action {
                FlowAction::CancelFollowUp => conversation.next_follow_up_at = None,
                FlowAction::ScheduleFollowUp => {
                    conversation.next_follow_up_at = Some(now + step.follow_up_delay);
                }
                FlowAction::MarkLeadQualified => {
                    promote(lead, step.services, business.avg_job_value);
                }
                FlowAction::MarkLeadUnresponsive => {
                    if !lead.status.has_converted() {
                        lead.status = LeadStatus::Unresponsive;
                    }
                }
                FlowAction::MarkLeadOptedOut => lead.status = LeadStatus::OptedOut,
                FlowAction::EscalateUrgency => lead.urgency = Some(Urgency::Emergency),
                FlowAction::GenerateReply
                | FlowAction::SendFollowUp
                | FlowAction::NotifyOwner(_)
                | FlowAction::ScheduleOwnerNudge => {}
            }
        }
        lead.updated_at = now;
        Ok(outcome)
    }

    /// Runs the timer and owner-facing actions of a committed transition.
    /// Failures here are logged; the committed state stands.
    async fn after_commit(
        &self,
        business: &Business,
        lead: &Lead,
        conversation: &Conversation,
        outcome: &TransitionOutcome,
        data: &NotificationData,
        effects: &mut Effects,
    ) {
        for action in &outcome.actions {
            match action {
                FlowAction::CancelFollowUp => {
                    if let Err(error) =
                        self.scheduler.cancel(conversation.id.as_str(), ActionKind::FollowUpNudge).await
                    {
                        warn!(
                            event_name = "conversation.follow_up.cancel_failed",
                            conversation_id = %conversation.id,
                            error = %error,
                            "could not cancel pending follow-up"
                        );
                    }
                }
                FlowAction::ScheduleFollowUp => {
                    let Some(fire_at) = conversation.next_follow_up_at else {
                        continue;
                    };
                    if let Err(error) = self.scheduler.schedule_follow_up(conversation, fire_at).await
                    {
                        warn!(
                            event_name = "conversation.follow_up.schedule_failed",
                            conversation_id = %conversation.id,
                            error = %error,
                            "could not schedule follow-up"
                        );
                    }
                }
                FlowAction::NotifyOwner(event) => effects.notify(*event, data.clone()),
                FlowAction::ScheduleOwnerNudge => self.arm_owner_nudge(business, lead).await,
                FlowAction::GenerateReply
                | FlowAction::SendFollowUp
                | FlowAction::MarkLeadQualified
                | FlowAction::MarkLeadUnresponsive
                | FlowAction::MarkLeadOptedOut
                | FlowAction::EscalateUrgency => {}
            }
        }
    }

    async fn arm_owner_nudge(&self, business: &Business, lead: &Lead) {
        let now = self.clock.now();
        let result = async {
            let outstanding = self.repos.nudges.list_pending_for_lead(&lead.id).await?;
            if outstanding.iter().any(|nudge| nudge.status == NudgeStatus::Pending) {
                return Ok(None);
            }
            let nudge = OwnerNudge::pending(business.id.clone(), lead.id.clone(), now);
            self.repos.nudges.save(&nudge).await?;
            self.scheduler
                .schedule(
                    nudge.id.as_str(),
                    ActionKind::OwnerNudge,
                    now + self.settings.owner_nudge_delay,
                    json!({ "lead_id": lead.id.as_str() }),
                )
                .await?;
            Ok::<_, callhook_db::RepositoryError>(Some(nudge))
        }
        .await;

        match result {
            Ok(Some(nudge)) => info!(
                event_name = "owner_nudge.armed",
                business_id = %business.id,
                lead_id = %lead.id,
                nudge_id = %nudge.id,
                "owner nudge scheduled"
            ),
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "owner_nudge.arm_failed",
                business_id = %business.id,
                lead_id = %lead.id,
                error = %error,
                "could not schedule owner nudge"
            ),
        }
    }

    /// Re-reads both rows; callers hold the lock.
    async fn reload(
        &self,
        business: &Business,
        lead_id: &LeadId,
        conversation_id: &ConversationId,
    ) -> Result<(Lead, Conversation), RuntimeError> {
        let lead = self
            .repos
            .leads
            .find_by_id(&business.id, lead_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", lead_id))?;
        let conversation = self
            .repos
            .conversations
            .find_by_id(&business.id, conversation_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("conversation", conversation_id))?;
        Ok((lead, conversation))
    }

    async fn commit(&self, lead: &Lead, conversation: &Conversation) -> Result<(), RuntimeError> {
        self.repos.leads.save(lead).await?;
        self.repos.conversations.save(conversation).await?;
        Ok(())
    }

    async fn require_business(&self, business_id: &BusinessId) -> Result<Business, RuntimeError> {
        self.repos
            .businesses
            .find_by_id(business_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("business", business_id))
    }

    /// Final compliance and ownership check, then the provider call. The
    /// outbound message is recorded whether or not the provider accepted it.
    async fn send_text(&self, business: &Business, text: OutboundText) -> Delivery {
        let opted_out = match self.repos.opt_outs.is_opted_out(&text.to, &business.id).await {
            Ok(opted_out) => opted_out,
            Err(error) => {
                warn!(
                    event_name = "sms.outbound.opt_out_check_failed",
                    business_id = %business.id,
                    error = %error,
                    "could not verify opt-out state; not sending"
                );
                return Delivery::Blocked("opt_out_unverified");
            }
        };
        let decision = self.guard.evaluate(&OutboundIntent {
            kind: text.kind,
            conversation_status: text.conversation_status,
            recipient_opted_out: opted_out,
            line_type: text.line_type,
        });
        if !decision.is_allowed() {
            let reason = decision.reason_code().unwrap_or("blocked");
            info!(
                event_name = "sms.outbound.blocked",
                business_id = %business.id,
                kind = text.kind.as_str(),
                reason,
                "outbound text suppressed"
            );
            return Delivery::Blocked(reason);
        }

        let result = self.ports.sms.send_sms(&text.to, &business.twilio_number, &text.body).await;
        let now = self.clock.now();
        let (status, provider_sid) = match &result {
            Ok(sent) => (DeliveryStatus::Sent, Some(sent.provider_sid.clone())),
            Err(_) => (DeliveryStatus::Failed, None),
        };

        if let Some(conversation_id) = text.conversation_id.clone() {
            let mut message = Message::outbound(conversation_id, text.sender, text.body, now);
            message.status = status;
            message.provider_sid = provider_sid;
            if let Err(error) = self.repos.messages.append(&message).await {
                warn!(
                    event_name = "sms.outbound.record_failed",
                    business_id = %business.id,
                    conversation_id = %message.conversation_id,
                    error = %error,
                    "could not record outbound message"
                );
            }
        }

        match result {
            Ok(sent) => {
                info!(
                    event_name = "sms.outbound.sent",
                    business_id = %business.id,
                    kind = text.kind.as_str(),
                    provider_sid = %sent.provider_sid,
                    "text sent"
                );
                Delivery::Sent { provider_sid: sent.provider_sid }
            }
            Err(error) => {
                warn!(
                    event_name = "sms.outbound.failed",
                    business_id = %business.id,
                    kind = text.kind.as_str(),
                    error = %error,
                    "text send failed"
                );
                Delivery::Failed(error)
            }
        }
    }

    /// Performs queued effects in order: texts first, then owner alerts.
    async fn flush(&self, business: &Business, effects: Effects) {
        for text in effects.texts {
            self.send_text(business, text).await;
        }
        let now = self.clock.now();
        for (event, data) in effects.notifications {
            self.notifier.notify(business, event, &data, now).await;
        }
    }
}

/// One flow event plus what its actions need.
pub(crate) struct Step<'a> {
    pub event: FlowEvent,
    pub correlation_id: &'a str,
    pub follow_up_delay: Duration,
    pub services: &'a [Service],
}

pub(crate) struct OutboundText {
    /// Where the outbound message is recorded; `None` sends without a trail.
    pub conversation_id: Option<ConversationId>,
    pub to: String,
    pub body: String,
    pub sender: SenderType,
    pub kind: MessageKind,
    /// Status the text was composed under.
    pub conversation_status: Option<ConversationStatus>,
    pub line_type: Option<LineType>,
}

impl OutboundText {
    fn ai(conversation: &Conversation, to: &str, body: String, kind: MessageKind) -> Self {
        Self {
            conversation_id: Some(conversation.id.clone()),
            to: to.to_string(),
            body,
            sender: SenderType::Ai,
            kind,
            conversation_status: Some(conversation.status),
            line_type: None,
        }
    }

    fn on_line(mut self, line_type: Option<LineType>) -> Self {
        self.line_type = line_type;
        self
    }
}

#[derive(Default)]
pub(crate) struct Effects {
    texts: Vec<OutboundText>,
    notifications: Vec<(NotificationEvent, NotificationData)>,
}

impl Effects {
    fn text(&mut self, text: OutboundText) {
        self.texts.push(text);
    }

    fn notify(&mut self, event: NotificationEvent, data: NotificationData) {
        self.notifications.push((event, data));
    }
}

#[derive(Debug)]
pub(crate) enum Delivery {
    Sent { provider_sid: String },
    Blocked(&'static str),
    Failed(IntegrationError),
}

/// Unknown line types are assumed to take texts.
fn is_textable(line_type: Option<LineType>) -> bool {
    line_type.map_or(true, callhook_core::channel::can_receive_sms)
}

fn lead_data(lead: &Lead) -> NotificationData {
    NotificationData::for_phone(lead.phone.clone()).with_lead(lead.id.clone(), lead.name.clone())
}
