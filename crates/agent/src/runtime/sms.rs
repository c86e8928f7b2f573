use tracing::{info, warn};

use callhook_core::domain::business::Business;
use callhook_core::domain::conversation::{Channel, ConversationId, ConversationStatus};
use callhook_core::domain::lead::{Lead, LeadId, LeadSource, LeadStatus, Urgency};
use callhook_core::domain::message::Message;
use callhook_core::domain::opt_out::{OptOut, OptOutScope};
use callhook_core::flows::FlowEvent;
use callhook_core::keywords::{classify, Keyword};
use callhook_core::notifications::{NotificationData, NotificationEvent};
use callhook_core::ports::{GeneratedReply, ReplyContext, ReplySignal};
use callhook_core::qualification::{evaluate, merge, QualificationOutcome};

use crate::error::RuntimeError;
use crate::events::InboundSms;
use crate::extraction::ExtractionContext;
use crate::guardrails::MessageKind;

use super::{lead_data, ConversationRuntime, Effects, OutboundText, Step};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmsDisposition {
    Ignored,
    Duplicate,
    OptedOut,
    OptedIn,
    /// The sender is opted out and the text was not a keyword.
    Suppressed,
    /// A human owns the conversation; the owner was told about the text.
    HandedToHuman,
    Replied,
    NoReply,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmsOutcome {
    pub disposition: SmsDisposition,
    /// Text to answer inline on the webhook response.
    pub reply: Option<String>,
    pub lead_id: Option<LeadId>,
    pub conversation_id: Option<ConversationId>,
}

impl SmsOutcome {
    fn bare(disposition: SmsDisposition) -> Self {
        Self { disposition, reply: None, lead_id: None, conversation_id: None }
    }
}

fn unsubscribed_reply(business: &Business) -> String {
    format!("You've been unsubscribed from {} messages. Reply START to re-subscribe.", business.name)
}

fn welcome_back_reply(business: &Business) -> String {
    format!("Welcome back! You'll now receive messages from {}.", business.name)
}

/// Highest-priority event a turn produced, if any.
fn turn_event(
    reply: Option<&GeneratedReply>,
    extracted_urgency: Option<Urgency>,
    qualification: &QualificationOutcome,
) -> Option<FlowEvent> {
    let signalled = |signal| reply.is_some_and(|reply| reply.has(signal));
    if signalled(ReplySignal::Emergency) || extracted_urgency == Some(Urgency::Emergency) {
        Some(FlowEvent::Emergency)
    } else if signalled(ReplySignal::HumanNeeded) {
        Some(FlowEvent::HumanNeeded)
    } else if signalled(ReplySignal::Qualified) || qualification.newly_qualified {
        Some(FlowEvent::Qualified)
    } else if reply.is_some_and(|reply| !reply.text.is_empty()) {
        Some(FlowEvent::AutomatedReply)
    } else {
        None
    }
}

impl ConversationRuntime {
    pub async fn handle_inbound_sms(&self, sms: InboundSms) -> Result<SmsOutcome, RuntimeError> {
        let Some(business) = self.repos.businesses.find_by_twilio_number(&sms.to).await? else {
            warn!(event_name = "sms.inbound.unknown_number", to = %sms.to, "sms for unknown number");
            return Ok(SmsOutcome::bare(SmsDisposition::Ignored));
        };
        let correlation_id = sms.message_sid.clone().unwrap_or_else(|| sms.from.clone());

        let guard = self.locks.lock(&business.id, &sms.from).await;
        if let Some(sid) = sms.message_sid.as_deref() {
            if self.repos.messages.exists_provider_sid(sid).await? {
                return Ok(SmsOutcome::bare(SmsDisposition::Duplicate));
            }
        }

        let keyword = classify(&sms.body);
        let opted_out = self.repos.opt_outs.is_opted_out(&sms.from, &business.id).await?;
        match keyword {
            Some(Keyword::OptOut) => {
                drop(guard);
                return self.opt_out(&business, &sms, &correlation_id).await;
            }
            Some(Keyword::OptIn) if opted_out => {
                self.repos
                    .opt_outs
                    .clear(&sms.from, &OptOutScope::Business(business.id.clone()))
                    .await?;
                if self.repos.opt_outs.is_opted_out(&sms.from, &business.id).await? {
                    // A global opt-out outlives a business-level START.
                    warn!(
                        event_name = "sms.inbound.opt_in_blocked",
                        business_id = %business.id,
                        "sender is still opted out globally"
                    );
                    return Ok(SmsOutcome::bare(SmsDisposition::Suppressed));
                }
                info!(
                    event_name = "sms.inbound.opted_in",
                    business_id = %business.id,
                    "sender re-subscribed"
                );
                return Ok(SmsOutcome {
                    reply: Some(welcome_back_reply(&business)),
                    ..SmsOutcome::bare(SmsDisposition::OptedIn)
                });
            }
            _ if opted_out => {
                info!(
                    event_name = "sms.inbound.suppressed",
                    business_id = %business.id,
                    "text from opted-out number ignored"
                );
                return Ok(SmsOutcome::bare(SmsDisposition::Suppressed));
            }
            _ => {}
        }

        let now = self.clock.now();
        let (mut lead, _) =
            self.repos.leads.find_or_create(&business.id, &sms.from, LeadSource::Sms, now).await?;
        let (mut conversation, created) = self
            .repos
            .conversations
            .find_or_open(&business.id, &lead.id, None, Channel::Sms, now)
            .await?;
        if created && lead.status == LeadStatus::OptedOut {
            lead.status = LeadStatus::New;
        }
        let mut outcome = SmsOutcome {
            lead_id: Some(lead.id.clone()),
            conversation_id: Some(conversation.id.clone()),
            ..SmsOutcome::bare(SmsDisposition::NoReply)
        };

        let history =
            self.repos.messages.list_recent(&conversation.id, self.settings.history_limit).await?;
        let inbound =
            Message::inbound(conversation.id.clone(), sms.body.as_str(), sms.message_sid.clone(), now);
        if !self.repos.messages.append(&inbound).await? {
            outcome.disposition = SmsDisposition::Duplicate;
            return Ok(outcome);
        }

        let step = Step {
            event: FlowEvent::InboundMessage,
            correlation_id: &correlation_id,
            follow_up_delay: self.settings.follow_up.reply_window,
            services: &[],
        };
        let transition = self.transition(&business, &mut conversation, &mut lead, &step)?;
        self.commit(&lead, &conversation).await?;
        drop(guard);

        let mut data = lead_data(&lead);
        data.body = Some(sms.body.clone());
        let mut effects = Effects::default();
        self.after_commit(&business, &lead, &conversation, &transition, &data, &mut effects).await;

        if conversation.status == ConversationStatus::HumanActive {
            self.flush(&business, effects).await;
            outcome.disposition = SmsDisposition::HandedToHuman;
            return Ok(outcome);
        }

        let services = self.repos.businesses.list_services(&business.id).await?;
        let update = self
            .ports
            .extractor
            .extract(ExtractionContext { text: &sms.body, lead: &lead, services: &services })
            .await;
        let mut preview = lead.clone();
        merge(&mut preview, &update);

        let reply = match self
            .ports
            .replies
            .generate_reply(ReplyContext {
                business: &business,
                lead: &preview,
                history: &history,
                inbound: &sms.body,
                now,
            })
            .await
        {
            Ok(reply) => Some(reply),
            Err(error) => {
                warn!(
                    event_name = "sms.reply.failed",
                    business_id = %business.id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "reply generation failed; handing the text to the owner"
                );
                effects.notify(NotificationEvent::NewMessage, data.clone());
                None
            }
        };

        let guard = self.locks.lock(&business.id, &sms.from).await;
        let (mut lead, mut conversation) =
            self.reload(&business, &lead.id, &conversation.id).await?;
        merge(&mut lead, &update);
        let qualification = evaluate(&mut lead, &services, business.avg_job_value);
        lead.updated_at = self.clock.now();

        if conversation.status != ConversationStatus::Active {
            // Someone else moved the conversation while the reply was generated.
            self.repos.leads.save(&lead).await?;
            drop(guard);
            self.flush(&business, effects).await;
            return Ok(outcome);
        }

        let composed_under = conversation.status;
        let event = turn_event(reply.as_ref(), update.urgency, &qualification);
        let mut transition = None;
        if let Some(event) = event {
            let step = Step {
                event,
                correlation_id: &correlation_id,
                follow_up_delay: self.settings.follow_up.reply_window,
                services: &services,
            };
            transition = Some(self.transition(&business, &mut conversation, &mut lead, &step)?);
        }
        self.commit(&lead, &conversation).await?;
        drop(guard);

        if let Some(text) = reply.map(|reply| reply.text).filter(|text| !text.is_empty()) {
            let mut outbound = OutboundText::ai(&conversation, &lead.phone, text, MessageKind::Reply);
            outbound.conversation_status = Some(composed_under);
            effects.text(outbound);
            outcome.disposition = SmsDisposition::Replied;
        }
        if let Some(transition) = &transition {
            let data = turn_data(&lead, &sms.body, transition.event);
            self.after_commit(&business, &lead, &conversation, transition, &data, &mut effects)
                .await;
        }
        self.flush(&business, effects).await;

        info!(
            event_name = "sms.inbound.handled",
            business_id = %business.id,
            conversation_id = %conversation.id,
            status = conversation.status.as_str(),
            lead_status = lead.status.as_str(),
            "inbound sms handled"
        );
        Ok(outcome)
    }

    async fn opt_out(
        &self,
        business: &Business,
        sms: &InboundSms,
        correlation_id: &str,
    ) -> Result<SmsOutcome, RuntimeError> {
        let now = self.clock.now();
        let guard = self.locks.lock(&business.id, &sms.from).await;
        self.repos
            .opt_outs
            .record(&OptOut {
                phone: sms.from.clone(),
                scope: OptOutScope::Business(business.id.clone()),
                created_at: now,
            })
            .await?;

        let mut outcome = SmsOutcome {
            reply: Some(unsubscribed_reply(business)),
            ..SmsOutcome::bare(SmsDisposition::OptedOut)
        };
        let Some(mut lead) = self.repos.leads.find_by_phone(&business.id, &sms.from).await? else {
            return Ok(outcome);
        };
        outcome.lead_id = Some(lead.id.clone());

        let mut closed = Vec::new();
        for mut conversation in self.repos.conversations.list_open_for_lead(&business.id, &lead.id).await? {
            if outcome.conversation_id.is_none() {
                let inbound = Message::inbound(
                    conversation.id.clone(),
                    sms.body.as_str(),
                    sms.message_sid.clone(),
                    now,
                );
                self.repos.messages.append(&inbound).await?;
                outcome.conversation_id = Some(conversation.id.clone());
            }
            let step = Step {
                event: FlowEvent::OptOut,
                correlation_id,
                follow_up_delay: self.settings.follow_up.reply_window,
                services: &[],
            };
            let transition = self.transition(business, &mut conversation, &mut lead, &step)?;
            self.repos.conversations.save(&conversation).await?;
            closed.push((conversation, transition));
        }
        lead.status = LeadStatus::OptedOut;
        lead.updated_at = now;
        self.repos.leads.save(&lead).await?;
        drop(guard);

        let data = lead_data(&lead);
        let mut effects = Effects::default();
        for (conversation, transition) in &closed {
            self.after_commit(business, &lead, conversation, transition, &data, &mut effects).await;
        }
        self.flush(business, effects).await;
        info!(
            event_name = "sms.inbound.opted_out",
            business_id = %business.id,
            lead_id = %lead.id,
            closed = closed.len(),
            "sender unsubscribed"
        );
        Ok(outcome)
    }
}

fn turn_data(lead: &Lead, body: &str, event: FlowEvent) -> NotificationData {
    let mut data = lead_data(lead);
    data.body = Some(body.to_string());
    match event {
        FlowEvent::Emergency => data.with_reason("Possible emergency reported by text"),
        FlowEvent::HumanNeeded => data.with_reason("Customer asked for a person"),
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use callhook_core::domain::lead::{LeadStatus, Urgency};
    use callhook_core::flows::FlowEvent;
    use callhook_core::ports::{GeneratedReply, ReplySignal};
    use callhook_core::qualification::QualificationOutcome;

    use super::turn_event;

    fn not_qualified() -> QualificationOutcome {
        QualificationOutcome {
            qualified: false,
            newly_qualified: false,
            status_change: None,
            estimated_value: None,
        }
    }

    #[test]
    fn emergency_outranks_every_other_signal() {
        let reply = GeneratedReply {
            text: "Please leave the house.".to_string(),
            signals: vec![ReplySignal::Qualified, ReplySignal::HumanNeeded, ReplySignal::Emergency],
        };
        assert_eq!(turn_event(Some(&reply), None, &not_qualified()), Some(FlowEvent::Emergency));

        let plain = GeneratedReply { text: "Got it.".to_string(), signals: vec![] };
        assert_eq!(
            turn_event(Some(&plain), Some(Urgency::Emergency), &not_qualified()),
            Some(FlowEvent::Emergency)
        );
    }

    #[test]
    fn rule_based_qualification_counts_without_a_tag() {
        let plain = GeneratedReply { text: "Thanks!".to_string(), signals: vec![] };
        let qualified = QualificationOutcome {
            qualified: true,
            newly_qualified: true,
            status_change: Some(LeadStatus::Qualified),
            estimated_value: None,
        };
        assert_eq!(turn_event(Some(&plain), None, &qualified), Some(FlowEvent::Qualified));
        assert_eq!(turn_event(Some(&plain), None, &not_qualified()), Some(FlowEvent::AutomatedReply));
        assert_eq!(turn_event(None, None, &not_qualified()), None);
    }
}
