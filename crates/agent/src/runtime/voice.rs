use serde_json::Value;
use tracing::{info, warn};

use callhook_core::domain::business::{Business, Service};
use callhook_core::domain::call::{Call, CallId};
use callhook_core::domain::conversation::{Channel, Conversation, ConversationId};
use callhook_core::domain::lead::{Lead, LeadId, LeadStatus, Urgency};
use callhook_core::flows::{FlowAction, FlowEvent, TransitionOutcome};
use callhook_core::notifications::{NotificationData, NotificationEvent};
use callhook_core::qualification::{evaluate, merge, QualificationUpdate};

use crate::error::RuntimeError;
use crate::events::{VoiceEndOfCall, VoiceFunctionCall};
use crate::extraction::ExtractionContext;
use crate::guardrails::MessageKind;
use crate::tools::{
    lead_info_from_params, reason_from_params, unknown_function_message, VoiceFunction,
};

use super::{is_textable, lead_data, ConversationRuntime, Effects, OutboundText, Step};

const DISCONNECTED_TEMPLATE: &str =
    "Hey! This is {business}. Looks like we got disconnected. What time works best to get you scheduled?";
const LANDLINE_REASON: &str = "Landline caller, call incomplete, cannot send SMS follow-up";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceReportDisposition {
    /// No call or lead could be matched to the report.
    Ignored,
    Emergency,
    Qualified,
    /// Details are missing; the caller was texted to continue.
    FollowingUp,
    OwnerCallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceReportOutcome {
    pub disposition: VoiceReportDisposition,
    pub lead_id: Option<LeadId>,
    pub conversation_id: Option<ConversationId>,
}

impl VoiceReportOutcome {
    fn ignored() -> Self {
        Self { disposition: VoiceReportDisposition::Ignored, lead_id: None, conversation_id: None }
    }
}

fn confirmation_text(business: &Business, lead: &Lead) -> String {
    let present = |value: &Option<String>| {
        value.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
    };
    let caller = present(&lead.name).map(|name| format!(", {name}")).unwrap_or_default();
    let service = present(&lead.service_needed).unwrap_or_else(|| "your service".to_string());
    let address = present(&lead.address).map(|address| format!(" at {address}")).unwrap_or_default();
    format!(
        "Thanks for calling {}{caller}! Confirming: {service}{address}. Someone will call to confirm the time. Text this number anytime if you need anything!",
        business.name
    )
}

/// The call, its business and its lead, as matched from provider ids.
struct VoiceSubject {
    call: Call,
    business: Business,
    lead: Lead,
}

impl ConversationRuntime {
    async fn resolve_voice_subject(
        &self,
        call_id: Option<&CallId>,
        provider_call_id: Option<&str>,
    ) -> Result<Option<VoiceSubject>, RuntimeError> {
        let mut call = None;
        if let Some(id) = call_id {
            call = self.repos.calls.find_by_id(id).await?;
        }
        if call.is_none() {
            if let Some(provider_id) = provider_call_id {
                call = self.repos.calls.find_by_provider_call_id(provider_id).await?;
            }
        }
        let Some(call) = call else {
            return Ok(None);
        };
        let Some(business) = self.repos.businesses.find_by_id(&call.business_id).await? else {
            return Ok(None);
        };
        let Some(lead_id) = call.lead_id.clone() else {
            return Ok(None);
        };
        let Some(lead) = self.repos.leads.find_by_id(&business.id, &lead_id).await? else {
            return Ok(None);
        };
        Ok(Some(VoiceSubject { call, business, lead }))
    }

    /// The conversation the call opened, or whatever thread is open for the lead.
    async fn voice_conversation(
        &self,
        business: &Business,
        call: &Call,
        lead: &Lead,
    ) -> Result<Conversation, RuntimeError> {
        if let Some(conversation) = self.repos.conversations.find_latest_for_call(&call.id).await? {
            return Ok(conversation);
        }
        let (conversation, _) = self
            .repos
            .conversations
            .find_or_open(&business.id, &lead.id, Some(&call.id), Channel::Voice, self.clock.now())
            .await?;
        Ok(conversation)
    }

    /// Applies `event` when the conversation can still take it; otherwise the
    /// owner is told directly. Either way the owner hears about it as `notice`.
    #[allow(clippy::too_many_arguments)]
    fn escalate(
        &self,
        business: &Business,
        conversation: &mut Conversation,
        lead: &mut Lead,
        event: FlowEvent,
        notice: NotificationEvent,
        correlation_id: &str,
        services: &[Service],
        data: &NotificationData,
        effects: &mut Effects,
    ) -> Result<Option<TransitionOutcome>, RuntimeError> {
        if conversation.status.is_open() {
            let step = Step {
                event,
                correlation_id,
                follow_up_delay: self.settings.follow_up.reply_window,
                services,
            };
            let mut outcome = self.transition(business, conversation, lead, &step)?;
            for action in &mut outcome.actions {
                if let FlowAction::NotifyOwner(owner_event) = action {
                    *owner_event = notice;
                }
            }
            return Ok(Some(outcome));
        }
        effects.notify(notice, data.clone());
        Ok(None)
    }

    pub async fn handle_voice_report(
        &self,
        report: VoiceEndOfCall,
    ) -> Result<VoiceReportOutcome, RuntimeError> {
        let Some(subject) = self
            .resolve_voice_subject(report.call_id.as_ref(), report.provider_call_id.as_deref())
            .await?
        else {
            warn!(
                event_name = "voice.report.unmatched",
                provider_call_id = report.provider_call_id.as_deref().unwrap_or_default(),
                "end-of-call report for unknown call"
            );
            return Ok(VoiceReportOutcome::ignored());
        };
        let VoiceSubject { mut call, business, lead } = subject;
        let correlation_id = report
            .provider_call_id
            .clone()
            .unwrap_or_else(|| call.id.to_string());

        let transcript = report.joined_transcript();
        let services = self.repos.businesses.list_services(&business.id).await?;
        let structured = QualificationUpdate::from_json(&report.structured_data);
        let extracted = if transcript.is_empty() {
            QualificationUpdate::default()
        } else {
            self.ports
                .extractor
                .extract(ExtractionContext { text: &transcript, lead: &lead, services: &services })
                .await
        };

        let guard = self.locks.lock(&business.id, &call.from_number).await;
        let now = self.clock.now();
        if let Some(provider_id) = report.provider_call_id.clone() {
            call.voice.provider_call_id.get_or_insert(provider_id);
        }
        call.voice.transcript = (!transcript.is_empty()).then(|| transcript.clone());
        call.voice.duration_secs = report.duration_secs;
        call.voice.cost = report.cost;
        call.voice.recording_url = report.recording_url.clone();
        call.voice.ended_reason = report.ended_reason.clone();
        call.updated_at = now;
        self.repos.calls.save(&call).await?;

        let mut lead = self
            .repos
            .leads
            .find_by_id(&business.id, &lead.id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", &lead.id))?;
        let mut conversation = self.voice_conversation(&business, &call, &lead).await?;
        conversation.qualification_data.insert("transcript".to_string(), Value::String(transcript));
        conversation
            .qualification_data
            .insert("structured_data".to_string(), report.structured_data.clone());
        if let Some(reason) = &report.ended_reason {
            conversation
                .qualification_data
                .insert("ended_reason".to_string(), Value::String(reason.clone()));
        }

        merge(&mut lead, &structured);
        merge(&mut lead, &extracted);
        let qualification = evaluate(&mut lead, &services, business.avg_job_value);
        lead.updated_at = now;

        let textable = is_textable(call.line_type);
        let mut effects = Effects::default();
        let mut transitions = Vec::new();
        let data = lead_data(&lead);
        let mut escalation_data = data.clone();

        let emergency = lead.urgency == Some(Urgency::Emergency);
        if emergency {
            escalation_data = data.clone().with_reason("Emergency reported on voice call");
        }
        let disposition = if qualification.qualified {
            // A qualified emergency still closes as qualified; only the owner alert differs.
            let notice = if emergency {
                NotificationEvent::Emergency
            } else {
                NotificationEvent::QualifiedLead
            };
            transitions.extend(self.escalate(
                &business,
                &mut conversation,
                &mut lead,
                FlowEvent::Qualified,
                notice,
                &correlation_id,
                &services,
                &escalation_data,
                &mut effects,
            )?);
            if emergency {
                VoiceReportDisposition::Emergency
            } else {
                VoiceReportDisposition::Qualified
            }
        } else if emergency {
            transitions.extend(self.escalate(
                &business,
                &mut conversation,
                &mut lead,
                FlowEvent::Emergency,
                NotificationEvent::Emergency,
                &correlation_id,
                &services,
                &escalation_data,
                &mut effects,
            )?);
            VoiceReportDisposition::Emergency
        } else if textable {
            effects.notify(
                NotificationEvent::MissedCall,
                data.clone().with_reason("Voice call ended before all details were collected"),
            );
            VoiceReportDisposition::FollowingUp
        } else {
            escalation_data = data.clone().with_reason(LANDLINE_REASON);
            transitions.extend(self.escalate(
                &business,
                &mut conversation,
                &mut lead,
                FlowEvent::HumanNeeded,
                NotificationEvent::HumanNeeded,
                &correlation_id,
                &services,
                &escalation_data,
                &mut effects,
            )?);
            VoiceReportDisposition::OwnerCallback
        };

        if textable {
            if qualification.qualified {
                let mut text = OutboundText::ai(
                    &conversation,
                    &lead.phone,
                    confirmation_text(&business, &lead),
                    MessageKind::Confirmation,
                );
                text.line_type = call.line_type;
                effects.text(text);
            } else if disposition == VoiceReportDisposition::FollowingUp
                && conversation.status.is_automated()
            {
                let body = DISCONNECTED_TEMPLATE.replace("{business}", &business.name);
                effects.text(
                    OutboundText::ai(&conversation, &lead.phone, body, MessageKind::Reply)
                        .on_line(call.line_type),
                );
                let step = Step {
                    event: FlowEvent::AutomatedReply,
                    correlation_id: &correlation_id,
                    follow_up_delay: self.settings.follow_up.reply_window,
                    services: &services,
                };
                transitions.push(self.transition(&business, &mut conversation, &mut lead, &step)?);
            }
        }

        self.commit(&lead, &conversation).await?;
        drop(guard);

        for transition in &transitions {
            self.after_commit(&business, &lead, &conversation, transition, &escalation_data, &mut effects)
                .await;
        }
        self.flush(&business, effects).await;

        info!(
            event_name = "voice.report.handled",
            business_id = %business.id,
            call_id = %call.id,
            lead_status = lead.status.as_str(),
            qualified = qualification.qualified,
            "end-of-call report handled"
        );
        Ok(VoiceReportOutcome {
            disposition,
            lead_id: Some(lead.id),
            conversation_id: Some(conversation.id),
        })
    }

    /// Runs a function the assistant invoked mid-call and returns the text
    /// handed back to it.
    pub async fn handle_voice_function(
        &self,
        invocation: VoiceFunctionCall,
    ) -> Result<String, RuntimeError> {
        let Some(function) = VoiceFunction::parse(&invocation.name) else {
            warn!(
                event_name = "voice.function.unknown",
                function = %invocation.name,
                "assistant called an unknown function"
            );
            return Ok(unknown_function_message(&invocation.name));
        };
        let Some(subject) = self
            .resolve_voice_subject(invocation.call_id.as_ref(), invocation.provider_call_id.as_deref())
            .await?
        else {
            warn!(
                event_name = "voice.function.unmatched",
                function = function.name(),
                "function call for unknown call"
            );
            return Ok(function.result_message().to_string());
        };
        let VoiceSubject { call, business, lead } = subject;
        let correlation_id =
            invocation.provider_call_id.clone().unwrap_or_else(|| call.id.to_string());

        let guard = self.locks.lock(&business.id, &call.from_number).await;
        let now = self.clock.now();
        let mut lead = self
            .repos
            .leads
            .find_by_id(&business.id, &lead.id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", &lead.id))?;
        let mut conversation = self.voice_conversation(&business, &call, &lead).await?;
        let mut effects = Effects::default();
        let mut transition = None;
        let mut data = lead_data(&lead);

        match function {
            VoiceFunction::SaveLeadInfo => {
                let update = lead_info_from_params(&invocation.params);
                merge(&mut lead, &update);
                if matches!(lead.status, LeadStatus::New | LeadStatus::Contacted) {
                    lead.status = LeadStatus::Qualifying;
                }
                lead.updated_at = now;
                conversation
                    .qualification_data
                    .insert("lead_info".to_string(), invocation.params.clone());
                conversation.updated_at = now;
            }
            VoiceFunction::FlagEmergency => {
                lead.urgency = Some(Urgency::Emergency);
                let reason = reason_from_params(&invocation.params)
                    .unwrap_or_else(|| "Emergency flagged during voice call".to_string());
                data = lead_data(&lead).with_reason(reason);
                transition = self.escalate(
                    &business,
                    &mut conversation,
                    &mut lead,
                    FlowEvent::Emergency,
                    NotificationEvent::Emergency,
                    &correlation_id,
                    &[],
                    &data,
                    &mut effects,
                )?;
            }
            VoiceFunction::RequestHumanCallback => {
                let reason = reason_from_params(&invocation.params)
                    .unwrap_or_else(|| "Caller asked for a call back".to_string());
                data = data.with_reason(reason);
                transition = self.escalate(
                    &business,
                    &mut conversation,
                    &mut lead,
                    FlowEvent::HumanNeeded,
                    NotificationEvent::HumanNeeded,
                    &correlation_id,
                    &[],
                    &data,
                    &mut effects,
                )?;
            }
        }

        self.commit(&lead, &conversation).await?;
        drop(guard);
        if let Some(transition) = &transition {
            self.after_commit(&business, &lead, &conversation, transition, &data, &mut effects)
                .await;
        }
        self.flush(&business, effects).await;

        info!(
            event_name = "voice.function.handled",
            business_id = %business.id,
            call_id = %call.id,
            function = function.name(),
            lead_status = lead.status.as_str(),
            "voice function handled"
        );
        Ok(function.result_message().to_string())
    }
}
