use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use callhook_core::domain::business::BusinessId;
use callhook_core::domain::conversation::ConversationId;
use callhook_core::domain::lead::LeadStatus;
use callhook_core::domain::message::SenderType;
use callhook_core::domain::nudge::{NudgeStatus, OwnerNudgeId};
use callhook_core::domain::review::{ReviewRequest, ReviewRequestId, ReviewStatus};
use callhook_core::domain::scheduled::{ActionKind, ScheduledAction};
use callhook_core::flows::FlowEvent;
use callhook_core::notifications::NotificationEvent;
use callhook_core::scheduling::{review_message, review_reminder_message, FollowUpDecision};

use crate::error::RuntimeError;
use crate::guardrails::MessageKind;
use crate::scheduler::{ActionHandler, ActionOutcome};

use super::{lead_data, ConversationRuntime, Delivery, Effects, OutboundText, Step};

fn skipped(reason: impl Into<String>) -> Result<ActionOutcome, RuntimeError> {
    Ok(ActionOutcome::Skipped(reason.into()))
}

#[async_trait]
impl ActionHandler for ConversationRuntime {
    async fn handle(&self, action: &ScheduledAction) -> Result<ActionOutcome, RuntimeError> {
        match action.kind {
            ActionKind::FollowUpNudge => self.fire_follow_up(action).await,
            ActionKind::OwnerNudge => self.fire_owner_nudge(action).await,
            ActionKind::ReviewRequest => self.fire_review_request(action).await,
            ActionKind::ReviewReminder => self.fire_review_reminder(action).await,
        }
    }
}

impl ConversationRuntime {
    async fn fire_follow_up(&self, action: &ScheduledAction) -> Result<ActionOutcome, RuntimeError> {
        let business_id = action
            .payload
            .get("business_id")
            .and_then(Value::as_str)
            .map(BusinessId::from)
            .ok_or_else(|| RuntimeError::MalformedAction(format!("{} has no business_id", action.id)))?;
        let Some(business) = self.repos.businesses.find_by_id(&business_id).await? else {
            return skipped("business no longer exists");
        };
        let conversation_id = ConversationId::from(action.subject_id.as_str());
        let Some(snapshot) =
            self.repos.conversations.find_by_id(&business.id, &conversation_id).await?
        else {
            return skipped("conversation no longer exists");
        };
        let Some(lead) = self.repos.leads.find_by_id(&business.id, &snapshot.lead_id).await? else {
            return skipped("lead no longer exists");
        };

        let guard = self.locks.lock(&business.id, &lead.phone).await;
        let (mut lead, mut conversation) =
            self.reload(&business, &snapshot.lead_id, &conversation_id).await?;
        if let Some(expected) = action.expected_follow_up_count() {
            if expected != conversation.follow_up_count {
                return skipped("follow-up counter moved on");
            }
        }
        if !conversation.status.is_automated() {
            return skipped(format!("conversation is {}", conversation.status.as_str()));
        }
        if self.repos.opt_outs.is_opted_out(&lead.phone, &business.id).await? {
            return skipped("recipient opted out");
        }
        if lead.status.has_converted() {
            return skipped(format!("lead is {}", lead.status.as_str()));
        }

        let decision = self.settings.follow_up.decide(conversation.follow_up_count, &business.name);
        let mut effects = Effects::default();
        let follow_up_delay = match &decision {
            FollowUpDecision::Send { next_delay, .. } => *next_delay,
            FollowUpDecision::Close => self.settings.follow_up.reply_window,
        };
        let step = Step {
            event: FlowEvent::FollowUpDue,
            correlation_id: action.id.as_str(),
            follow_up_delay,
            services: &[],
        };
        let transition = self.transition(&business, &mut conversation, &mut lead, &step)?;
        if let FollowUpDecision::Send { text, next_count, .. } = decision {
            conversation.follow_up_count = next_count;
            effects.text(OutboundText::ai(&conversation, &lead.phone, text, MessageKind::FollowUp));
        }
        self.commit(&lead, &conversation).await?;
        drop(guard);

        self.after_commit(&business, &lead, &conversation, &transition, &lead_data(&lead), &mut effects)
            .await;
        self.flush(&business, effects).await;
        info!(
            event_name = "follow_up.fired",
            business_id = %business.id,
            conversation_id = %conversation.id,
            follow_up_count = conversation.follow_up_count,
            status = conversation.status.as_str(),
            "follow-up handled"
        );
        Ok(ActionOutcome::Fired)
    }

    async fn fire_owner_nudge(&self, action: &ScheduledAction) -> Result<ActionOutcome, RuntimeError> {
        let nudge_id = OwnerNudgeId::from(action.subject_id.as_str());
        let Some(mut nudge) = self.repos.nudges.find_by_id(&nudge_id).await? else {
            return skipped("nudge no longer exists");
        };
        if nudge.status != NudgeStatus::Pending {
            return skipped(format!("nudge is {}", nudge.status.as_str()));
        }
        let Some(business) = self.repos.businesses.find_by_id(&nudge.business_id).await? else {
            return skipped("business no longer exists");
        };
        let Some(lead) = self.repos.leads.find_by_id(&business.id, &nudge.lead_id).await? else {
            return skipped("lead no longer exists");
        };
        if lead.status != LeadStatus::Qualified {
            nudge.status = NudgeStatus::Cancelled;
            self.repos.nudges.save(&nudge).await?;
            return skipped(format!("lead is {}", lead.status.as_str()));
        }

        let now = self.clock.now();
        let data = lead_data(&lead).with_reason("Qualified lead is still waiting for a callback");
        self.notifier.notify(&business, NotificationEvent::OwnerNudge, &data, now).await;
        nudge.status = NudgeStatus::Sent;
        nudge.sent_at = Some(now);
        self.repos.nudges.save(&nudge).await?;
        Ok(ActionOutcome::Fired)
    }

    async fn review_subject(
        &self,
        action: &ScheduledAction,
    ) -> Result<Option<ReviewRequest>, RuntimeError> {
        let review_id = ReviewRequestId::from(action.subject_id.as_str());
        Ok(self.repos.reviews.find_by_id(&review_id).await?)
    }

    async fn send_review_text(
        &self,
        review: &ReviewRequest,
        body: impl FnOnce(&str, Option<&str>, &str) -> String,
    ) -> Result<Delivery, RuntimeError> {
        let business = self.require_business(&review.business_id).await?;
        let lead = self
            .repos
            .leads
            .find_by_id(&business.id, &review.lead_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", &review.lead_id))?;
        let conversation =
            self.repos.conversations.find_latest_for_lead(&business.id, &lead.id).await?;
        let text = OutboundText {
            conversation_id: conversation.map(|conversation| conversation.id),
            to: lead.phone.clone(),
            body: body(&business.name, lead.name.as_deref(), &review.review_link),
            sender: SenderType::Ai,
            kind: MessageKind::ReviewRequest,
            conversation_status: None,
            line_type: None,
        };
        Ok(self.send_text(&business, text).await)
    }

    async fn fire_review_request(
        &self,
        action: &ScheduledAction,
    ) -> Result<ActionOutcome, RuntimeError> {
        let Some(mut review) = self.review_subject(action).await? else {
            return skipped("review request no longer exists");
        };
        if review.status != ReviewStatus::Pending {
            return skipped(format!("review request is {}", review.status.as_str()));
        }

        match self.send_review_text(&review, review_message).await? {
            Delivery::Sent { .. } => {
                let now = self.clock.now();
                review.status = ReviewStatus::Sent;
                review.sent_at = Some(now);
                self.repos.reviews.save(&review).await?;
                self.scheduler
                    .schedule(
                        review.id.as_str(),
                        ActionKind::ReviewReminder,
                        self.settings.review.reminder_at(review.job_completed_at).max(now),
                        json!({ "business_id": review.business_id.as_str() }),
                    )
                    .await?;
                Ok(ActionOutcome::Fired)
            }
            Delivery::Blocked(reason) => {
                review.status = ReviewStatus::Cancelled;
                self.repos.reviews.save(&review).await?;
                skipped(reason)
            }
            Delivery::Failed(error) => Err(RuntimeError::Integration(error)),
        }
    }

    async fn fire_review_reminder(
        &self,
        action: &ScheduledAction,
    ) -> Result<ActionOutcome, RuntimeError> {
        let Some(mut review) = self.review_subject(action).await? else {
            return skipped("review request no longer exists");
        };
        if review.status != ReviewStatus::Sent || !review.reminder_due() {
            return skipped(format!("review request is {}", review.status.as_str()));
        }

        let reminder = |business: &str, _: Option<&str>, link: &str| {
            review_reminder_message(business, link)
        };
        match self.send_review_text(&review, reminder).await? {
            Delivery::Sent { .. } => {
                review.reminder_sent_at = Some(self.clock.now());
                self.repos.reviews.save(&review).await?;
                Ok(ActionOutcome::Fired)
            }
            Delivery::Blocked(reason) => skipped(reason),
            Delivery::Failed(error) => Err(RuntimeError::Integration(error)),
        }
    }
}
