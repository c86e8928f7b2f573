//! Operator actions from the owner dashboard. Unlike webhook handlers these
//! surface failures to the caller.

use tracing::{info, warn};

use callhook_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, NewAppointment,
};
use callhook_core::domain::business::{Business, BusinessId};
use callhook_core::domain::conversation::{Conversation, ConversationId};
use callhook_core::domain::lead::{Lead, LeadId, LeadStatus};
use callhook_core::domain::message::{DeliveryStatus, SenderType};
use callhook_core::domain::nudge::{NudgeStatus, OwnerNudge, OwnerNudgeId};
use callhook_core::domain::review::{ReviewRequest, ReviewRequestId, ReviewStatus};
use callhook_core::domain::scheduled::ActionKind;
use callhook_core::flows::FlowEvent;
use callhook_core::notifications::NotificationEvent;
use callhook_core::patch::{AppointmentPatch, LeadPatch, SettingsPatch};

use crate::error::RuntimeError;
use crate::events::DeliveryStatusUpdate;
use crate::guardrails::MessageKind;

use super::{lead_data, ConversationRuntime, Delivery, Effects, OutboundText, Step};

const OPERATOR_ACTOR: &str = "operator";

impl ConversationRuntime {
    async fn operator_thread(
        &self,
        business_id: &BusinessId,
        conversation_id: &ConversationId,
    ) -> Result<(Business, Lead, Conversation), RuntimeError> {
        let business = self.require_business(business_id).await?;
        let conversation = self
            .repos
            .conversations
            .find_by_id(&business.id, conversation_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("conversation", conversation_id))?;
        let lead = self
            .repos
            .leads
            .find_by_id(&business.id, &conversation.lead_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", &conversation.lead_id))?;
        Ok((business, lead, conversation))
    }

    async fn operator_transition(
        &self,
        business_id: &BusinessId,
        conversation_id: &ConversationId,
        event: FlowEvent,
    ) -> Result<Conversation, RuntimeError> {
        let (business, lead, _) = self.operator_thread(business_id, conversation_id).await?;
        let guard = self.locks.lock(&business.id, &lead.phone).await;
        let (mut lead, mut conversation) =
            self.reload(&business, &lead.id, conversation_id).await?;
        let step = Step {
            event,
            correlation_id: OPERATOR_ACTOR,
            follow_up_delay: self.settings.follow_up.reply_window,
            services: &[],
        };
        let transition = self.transition(&business, &mut conversation, &mut lead, &step)?;
        self.commit(&lead, &conversation).await?;
        drop(guard);

        let mut effects = Effects::default();
        self.after_commit(&business, &lead, &conversation, &transition, &lead_data(&lead), &mut effects)
            .await;
        self.flush(&business, effects).await;
        info!(
            event_name = "operator.transition",
            business_id = %business.id,
            conversation_id = %conversation.id,
            event = event.as_str(),
            status = conversation.status.as_str(),
            "operator changed conversation ownership"
        );
        Ok(conversation)
    }

    /// Stops automation and hands the thread to the owner.
    pub async fn take_over(
        &self,
        business_id: &BusinessId,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, RuntimeError> {
        self.operator_transition(business_id, conversation_id, FlowEvent::HumanTakeover).await
    }

    pub async fn return_to_ai(
        &self,
        business_id: &BusinessId,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, RuntimeError> {
        self.operator_transition(business_id, conversation_id, FlowEvent::ReturnToAi).await
    }

    /// Sends an owner-typed text. An automated conversation is taken over
    /// first so the assistant stops answering. Returns the provider sid.
    pub async fn send_manual_message(
        &self,
        business_id: &BusinessId,
        conversation_id: &ConversationId,
        body: &str,
    ) -> Result<String, RuntimeError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(RuntimeError::Blocked("message body is empty".to_string()));
        }
        let (business, lead, mut conversation) =
            self.operator_thread(business_id, conversation_id).await?;
        if conversation.status.is_automated() {
            conversation = self.take_over(business_id, conversation_id).await?;
        }

        let text = OutboundText {
            conversation_id: Some(conversation.id.clone()),
            to: lead.phone.clone(),
            body: body.to_string(),
            sender: SenderType::Human,
            kind: MessageKind::Manual,
            conversation_status: Some(conversation.status),
            line_type: None,
        };
        match self.send_text(&business, text).await {
            Delivery::Sent { provider_sid } => Ok(provider_sid),
            Delivery::Blocked(reason) => Err(RuntimeError::Blocked(reason.to_string())),
            Delivery::Failed(error) => Err(RuntimeError::Integration(error)),
        }
    }

    pub async fn update_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
        patch: &LeadPatch,
    ) -> Result<Lead, RuntimeError> {
        let mut lead = self
            .repos
            .leads
            .find_by_id(business_id, lead_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", lead_id))?;
        let _guard = self.locks.lock(business_id, &lead.phone).await;
        let changed = patch.apply(&mut lead)?;
        lead.updated_at = self.clock.now();
        self.repos.leads.save(&lead).await?;
        info!(
            event_name = "operator.lead.updated",
            business_id = %business_id,
            lead_id = %lead.id,
            fields = ?changed,
            "lead updated"
        );
        Ok(lead)
    }

    pub async fn update_settings(
        &self,
        business_id: &BusinessId,
        patch: &SettingsPatch,
    ) -> Result<Business, RuntimeError> {
        let mut business = self.require_business(business_id).await?;
        let changed = patch.apply(&mut business)?;
        business.updated_at = self.clock.now();
        self.repos.businesses.save(&business).await?;
        info!(
            event_name = "operator.settings.updated",
            business_id = %business.id,
            fields = ?changed,
            "business settings updated"
        );
        Ok(business)
    }

    /// Books the lead, retires its pending owner nudges and pushes the event to
    /// the owner's calendar when one is connected.
    pub async fn book_appointment(
        &self,
        business_id: &BusinessId,
        input: NewAppointment,
    ) -> Result<Appointment, RuntimeError> {
        let business = self.require_business(business_id).await?;
        let now = self.clock.now();
        let mut lead = self
            .repos
            .leads
            .find_by_id(&business.id, &input.lead_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("lead", &input.lead_id))?;

        let guard = self.locks.lock(&business.id, &lead.phone).await;
        let mut appointment = Appointment::book(business.id.clone(), input, now);
        if appointment.address.is_none() {
            appointment.address = lead.address.clone();
        }
        if appointment.service_type.is_none() {
            appointment.service_type = lead.service_needed.clone();
        }
        self.repos.appointments.save(&appointment).await?;
        lead.status = LeadStatus::Booked;
        lead.updated_at = now;
        self.repos.leads.save(&lead).await?;

        let nudges = self.repos.nudges.list_pending_for_lead(&lead.id).await?;
        let open = self.repos.conversations.list_open_for_lead(&business.id, &lead.id).await?;
        for mut conversation in open.iter().cloned() {
            conversation.next_follow_up_at = None;
            conversation.updated_at = now;
            self.repos.conversations.save(&conversation).await?;
        }
        for mut nudge in nudges.iter().filter(|nudge| nudge.status == NudgeStatus::Pending).cloned() {
            nudge.status = NudgeStatus::Cancelled;
            self.repos.nudges.save(&nudge).await?;
        }
        drop(guard);

        for nudge in &nudges {
            self.scheduler.cancel(nudge.id.as_str(), ActionKind::OwnerNudge).await?;
        }
        for conversation in &open {
            self.scheduler.cancel(conversation.id.as_str(), ActionKind::FollowUpNudge).await?;
        }

        if let (Some(calendar), Some(_)) =
            (self.ports.calendar.as_ref(), business.calendar_refresh_token.as_ref())
        {
            match calendar.create_event(&business, &appointment, &lead).await {
                Ok(event_id) => {
                    appointment.calendar_event_id = Some(event_id);
                    self.repos.appointments.save(&appointment).await?;
                }
                Err(error) => warn!(
                    event_name = "calendar.event.failed",
                    business_id = %business.id,
                    appointment_id = %appointment.id,
                    error = %error,
                    "could not add appointment to calendar"
                ),
            }
        }

        let data = lead_data(&lead).with_reason(format!(
            "{} at {}",
            appointment.scheduled_date.format("%a %b %-d"),
            appointment.scheduled_time.format("%-I:%M %p")
        ));
        self.notifier.notify(&business, NotificationEvent::AppointmentBooked, &data, now).await;
        info!(
            event_name = "operator.appointment.booked",
            business_id = %business.id,
            lead_id = %lead.id,
            appointment_id = %appointment.id,
            "appointment booked"
        );
        Ok(appointment)
    }

    /// Completing an appointment completes the lead and, when the business has
    /// a review link, queues the review request.
    pub async fn update_appointment(
        &self,
        business_id: &BusinessId,
        appointment_id: &AppointmentId,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, RuntimeError> {
        let business = self.require_business(business_id).await?;
        let mut appointment = self
            .repos
            .appointments
            .find_by_id(&business.id, appointment_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("appointment", appointment_id))?;
        let was_completed = appointment.status == AppointmentStatus::Completed;
        patch.apply(&mut appointment)?;
        appointment.updated_at = self.clock.now();
        self.repos.appointments.save(&appointment).await?;

        if appointment.status != AppointmentStatus::Completed || was_completed {
            return Ok(appointment);
        }

        let now = self.clock.now();
        if let Some(mut lead) =
            self.repos.leads.find_by_id(&business.id, &appointment.lead_id).await?
        {
            lead.status = LeadStatus::Completed;
            lead.updated_at = now;
            self.repos.leads.save(&lead).await?;
        }

        let Some(link) = business.review_link() else {
            return Ok(appointment);
        };
        if self.repos.reviews.find_by_appointment(&appointment.id).await?.is_some() {
            return Ok(appointment);
        }
        let review = ReviewRequest::pending(
            business.id.clone(),
            appointment.lead_id.clone(),
            appointment.id.clone(),
            link,
            now,
        );
        self.repos.reviews.save(&review).await?;
        self.scheduler
            .schedule(
                review.id.as_str(),
                ActionKind::ReviewRequest,
                self.settings.review.request_at(now),
                serde_json::json!({ "business_id": business.id.as_str() }),
            )
            .await?;
        info!(
            event_name = "operator.appointment.completed",
            business_id = %business.id,
            appointment_id = %appointment.id,
            review_id = %review.id,
            "review request queued"
        );
        Ok(appointment)
    }

    pub async fn acknowledge_nudge(&self, nudge_id: &OwnerNudgeId) -> Result<OwnerNudge, RuntimeError> {
        let mut nudge = self
            .repos
            .nudges
            .find_by_id(nudge_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("owner nudge", nudge_id))?;
        if matches!(nudge.status, NudgeStatus::Pending | NudgeStatus::Sent) {
            nudge.status = NudgeStatus::Acknowledged;
            nudge.acknowledged_at = Some(self.clock.now());
            self.repos.nudges.save(&nudge).await?;
            self.scheduler.cancel(nudge.id.as_str(), ActionKind::OwnerNudge).await?;
        }
        Ok(nudge)
    }

    /// Marks a review request as done; pending sends and reminders are dropped.
    pub async fn complete_review(&self, review_id: &ReviewRequestId) -> Result<ReviewRequest, RuntimeError> {
        let mut review = self
            .repos
            .reviews
            .find_by_id(review_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("review request", review_id))?;
        if review.status != ReviewStatus::Reviewed {
            review.status = ReviewStatus::Reviewed;
            review.completed_at = Some(self.clock.now());
            self.repos.reviews.save(&review).await?;
            self.scheduler.cancel(review.id.as_str(), ActionKind::ReviewRequest).await?;
            self.scheduler.cancel(review.id.as_str(), ActionKind::ReviewReminder).await?;
        }
        Ok(review)
    }

    /// Returns false for unknown sids and unreadable statuses.
    pub async fn record_delivery_status(
        &self,
        update: &DeliveryStatusUpdate,
    ) -> Result<bool, RuntimeError> {
        let Some(status) = DeliveryStatus::parse(&update.status) else {
            warn!(
                event_name = "sms.status.unknown",
                message_sid = %update.message_sid,
                status = %update.status,
                "unrecognised delivery status"
            );
            return Ok(false);
        };
        Ok(self.repos.messages.update_status_by_sid(&update.message_sid, status).await?)
    }
}
