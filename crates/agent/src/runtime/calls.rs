use tracing::{info, warn};

use callhook_core::channel::can_receive_sms;
use callhook_core::domain::call::{Call, CallId, CallStatus};
use callhook_core::domain::conversation::{Channel, ConversationId};
use callhook_core::domain::lead::{LeadId, LeadSource, LeadStatus};
use callhook_core::flows::FlowEvent;
use callhook_core::notifications::NotificationEvent;
use callhook_core::ports::VoiceTransfer;

use crate::error::RuntimeError;
use crate::events::{IncomingCall, InboundCall};
use crate::guardrails::MessageKind;

use super::{lead_data, ConversationRuntime, Effects, OutboundText, Step};

/// Where the incoming-call webhook should forward the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingCallOutcome {
    pub business_name: String,
    pub forward_to: String,
    pub call_id: CallId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissedCallDisposition {
    /// No business owns the dialled number.
    Ignored,
    /// This call sid was already handled.
    Duplicate,
    OptedOut,
    /// The caller already had an open conversation.
    RepeatCall,
    VoiceTransferred,
    TextedBack,
    /// The caller cannot receive texts; the owner was asked to call back.
    OwnerCallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissedCallOutcome {
    pub disposition: MissedCallDisposition,
    pub business_name: Option<String>,
    pub lead_id: Option<LeadId>,
    pub conversation_id: Option<ConversationId>,
    pub call_id: Option<CallId>,
}

impl MissedCallOutcome {
    fn ignored() -> Self {
        Self {
            disposition: MissedCallDisposition::Ignored,
            business_name: None,
            lead_id: None,
            conversation_id: None,
            call_id: None,
        }
    }
}

impl ConversationRuntime {
    /// Records the ringing call. `None` when the number belongs to no business.
    pub async fn handle_incoming_call(
        &self,
        incoming: IncomingCall,
    ) -> Result<Option<IncomingCallOutcome>, RuntimeError> {
        let Some(business) = self.repos.businesses.find_by_twilio_number(&incoming.to).await? else {
            warn!(
                event_name = "call.incoming.unknown_number",
                to = %incoming.to,
                "incoming call for unknown number"
            );
            return Ok(None);
        };
        let now = self.clock.now();
        let call = self
            .repos
            .calls
            .record(&Call::ringing(
                business.id.clone(),
                incoming.call_sid.as_str(),
                incoming.from.as_str(),
                incoming.to.as_str(),
                business.is_after_hours(now),
                now,
            ))
            .await?;
        info!(
            event_name = "call.incoming.recorded",
            business_id = %business.id,
            call_id = %call.id,
            call_sid = %call.call_sid,
            "incoming call recorded"
        );
        Ok(Some(IncomingCallOutcome {
            business_name: business.name,
            forward_to: business.business_phone,
            call_id: call.id,
        }))
    }

    /// Returns false when the sid is unknown.
    pub async fn handle_call_answered(
        &self,
        call_sid: &str,
        duration_secs: Option<u32>,
    ) -> Result<bool, RuntimeError> {
        let Some(mut call) = self.repos.calls.find_by_sid(call_sid).await? else {
            return Ok(false);
        };
        call.status = CallStatus::Answered;
        call.duration_secs = duration_secs.or(call.duration_secs);
        call.updated_at = self.clock.now();
        self.repos.calls.save(&call).await?;
        Ok(true)
    }

    pub async fn handle_missed_call(
        &self,
        inbound: InboundCall,
    ) -> Result<MissedCallOutcome, RuntimeError> {
        let Some(business) = self.repos.businesses.find_by_twilio_number(&inbound.to).await? else {
            warn!(
                event_name = "call.missed.unknown_number",
                to = %inbound.to,
                "missed call for unknown number"
            );
            return Ok(MissedCallOutcome::ignored());
        };
        let now = self.clock.now();
        let after_hours = inbound.is_after_hours.unwrap_or_else(|| business.is_after_hours(now));
        let mut outcome = MissedCallOutcome {
            business_name: Some(business.name.clone()),
            ..MissedCallOutcome::ignored()
        };

        let guard = self.locks.lock(&business.id, &inbound.from).await;
        let mut call = self
            .repos
            .calls
            .record(&Call::ringing(
                business.id.clone(),
                inbound.call_sid.as_str(),
                inbound.from.as_str(),
                inbound.to.as_str(),
                after_hours,
                now,
            ))
            .await?;
        outcome.call_id = Some(call.id.clone());

        if call.status == CallStatus::Missed {
            info!(
                event_name = "call.missed.duplicate",
                business_id = %business.id,
                call_sid = %call.call_sid,
                "missed call already handled"
            );
            outcome.disposition = MissedCallDisposition::Duplicate;
            outcome.lead_id = call.lead_id.clone();
            return Ok(outcome);
        }
        call.status = CallStatus::Missed;
        call.is_after_hours = after_hours;
        call.updated_at = now;

        if self.repos.opt_outs.is_opted_out(&inbound.from, &business.id).await? {
            self.repos.calls.save(&call).await?;
            info!(
                event_name = "call.missed.opted_out",
                business_id = %business.id,
                call_id = %call.id,
                "caller opted out; no outreach"
            );
            outcome.disposition = MissedCallDisposition::OptedOut;
            return Ok(outcome);
        }

        let (mut lead, _) = self
            .repos
            .leads
            .find_or_create(&business.id, &inbound.from, LeadSource::MissedCall, now)
            .await?;
        call.lead_id = Some(lead.id.clone());
        self.repos.calls.save(&call).await?;

        let (mut conversation, created) = self
            .repos
            .conversations
            .find_or_open(&business.id, &lead.id, Some(&call.id), Channel::Sms, now)
            .await?;
        outcome.lead_id = Some(lead.id.clone());
        outcome.conversation_id = Some(conversation.id.clone());

        if !created {
            let step = Step {
                event: FlowEvent::RepeatCall,
                correlation_id: &call.call_sid,
                follow_up_delay: self.settings.follow_up.reply_window,
                services: &[],
            };
            let transition = self.transition(&business, &mut conversation, &mut lead, &step)?;
            self.commit(&lead, &conversation).await?;
            drop(guard);

            let mut data = lead_data(&lead);
            data.after_hours = Some(after_hours);
            let mut effects = Effects::default();
            self.after_commit(&business, &lead, &conversation, &transition, &data, &mut effects)
                .await;
            self.flush(&business, effects).await;
            info!(
                event_name = "call.missed.repeat",
                business_id = %business.id,
                conversation_id = %conversation.id,
                status = conversation.status.as_str(),
                "repeat call on open conversation"
            );
            outcome.disposition = MissedCallDisposition::RepeatCall;
            return Ok(outcome);
        }

        if lead.status == LeadStatus::OptedOut {
            lead.status = LeadStatus::New;
            lead.updated_at = now;
            self.repos.leads.save(&lead).await?;
        }
        drop(guard);

        let line_type = match call.line_type {
            Some(line_type) => line_type,
            None => {
                let line_type = self.ports.lookup.lookup_line_type(&inbound.from).await;
                call.line_type = Some(line_type);
                if let Err(error) = self.repos.calls.save(&call).await {
                    warn!(
                        event_name = "call.line_type.save_failed",
                        call_id = %call.id,
                        error = %error,
                        "could not cache line type"
                    );
                }
                line_type
            }
        };

        if self.settings.voice_ai_enabled {
            if let Some(assistant_id) = business.voice_assistant_id.clone() {
                let transfer = VoiceTransfer {
                    assistant_id,
                    caller_phone: inbound.from.clone(),
                    business_id: business.id.to_string(),
                    call_id: call.id.to_string(),
                    first_message: business.greeting(),
                };
                match self.ports.voice.place_or_transfer_call(&transfer).await {
                    Ok(provider_call_id) => {
                        call.voice.provider_call_id = Some(provider_call_id);
                        call.updated_at = self.clock.now();
                        self.repos.calls.save(&call).await?;

                        let _guard = self.locks.lock(&business.id, &inbound.from).await;
                        let (_, mut conversation) =
                            self.reload(&business, &lead.id, &conversation.id).await?;
                        conversation.channel = Channel::Voice;
                        conversation.updated_at = self.clock.now();
                        self.repos.conversations.save(&conversation).await?;
                        info!(
                            event_name = "call.missed.voice_transferred",
                            business_id = %business.id,
                            call_id = %call.id,
                            "caller handed to voice assistant"
                        );
                        outcome.disposition = MissedCallDisposition::VoiceTransferred;
                        return Ok(outcome);
                    }
                    Err(error) => warn!(
                        event_name = "call.missed.voice_failed",
                        business_id = %business.id,
                        call_id = %call.id,
                        error = %error,
                        "voice assistant unavailable; falling back to sms"
                    ),
                }
            }
        }

        let guard = self.locks.lock(&business.id, &inbound.from).await;
        let (mut lead, mut conversation) = self.reload(&business, &lead.id, &conversation.id).await?;
        let mut effects = Effects::default();
        let mut data = lead_data(&lead);
        data.after_hours = Some(after_hours);

        let (event, disposition) = if can_receive_sms(line_type) {
            effects.text(
                OutboundText::ai(&conversation, &lead.phone, business.greeting(), MessageKind::Greeting)
                    .on_line(Some(line_type)),
            );
            effects.notify(NotificationEvent::MissedCall, data.clone());
            (FlowEvent::AutomatedReply, MissedCallDisposition::TextedBack)
        } else {
            data = data.with_reason("human callback needed");
            (FlowEvent::HumanNeeded, MissedCallDisposition::OwnerCallback)
        };

        let step = Step {
            event,
            correlation_id: &call.call_sid,
            follow_up_delay: self.settings.follow_up.reply_window,
            services: &[],
        };
        let transition = self.transition(&business, &mut conversation, &mut lead, &step)?;
        self.commit(&lead, &conversation).await?;
        drop(guard);

        self.after_commit(&business, &lead, &conversation, &transition, &data, &mut effects).await;
        self.flush(&business, effects).await;
        info!(
            event_name = "call.missed.handled",
            business_id = %business.id,
            call_id = %call.id,
            line_type = line_type.as_str(),
            after_hours,
            "missed call handled"
        );
        outcome.disposition = disposition;
        Ok(outcome)
    }
}
