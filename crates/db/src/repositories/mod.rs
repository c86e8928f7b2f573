use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use callhook_core::domain::appointment::{Appointment, AppointmentId};
use callhook_core::domain::business::{Business, BusinessId, Service};
use callhook_core::domain::call::{Call, CallId};
use callhook_core::domain::conversation::{Channel, Conversation, ConversationId};
use callhook_core::domain::lead::{Lead, LeadId, LeadSource};
use callhook_core::domain::message::{DeliveryStatus, Message};
use callhook_core::domain::nudge::{OwnerNudge, OwnerNudgeId};
use callhook_core::domain::opt_out::{OptOut, OptOutScope};
use callhook_core::domain::review::{ReviewRequest, ReviewRequestId};
use callhook_core::domain::scheduled::{
    ActionKind, ActionState, ScheduledAction, ScheduledActionId,
};

use crate::DbPool;

pub mod appointment;
pub mod business;
pub mod call;
mod codec;
pub mod conversation;
pub mod lead;
pub mod message;
pub mod nudge;
pub mod opt_out;
pub mod review;
pub mod scheduled_action;

pub use appointment::SqlAppointmentRepository;
pub use business::SqlBusinessRepository;
pub use call::SqlCallRepository;
pub use conversation::SqlConversationRepository;
pub use lead::SqlLeadRepository;
pub use message::SqlMessageRepository;
pub use nudge::SqlOwnerNudgeRepository;
pub use opt_out::SqlOptOutRepository;
pub use review::SqlReviewRequestRepository;
pub use scheduled_action::SqlScheduledActionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait BusinessRepository: Send + Sync {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<Business>, RepositoryError>;
    /// Resolves the tenant from the provider number a caller dialled.
    async fn find_by_twilio_number(&self, number: &str)
        -> Result<Option<Business>, RepositoryError>;
    async fn save(&self, business: &Business) -> Result<(), RepositoryError>;
    /// Ordered by `sort_order`, then name.
    async fn list_services(&self, business_id: &BusinessId)
        -> Result<Vec<Service>, RepositoryError>;
    async fn save_service(&self, service: &Service) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError>;
    async fn find_by_phone(
        &self,
        business_id: &BusinessId,
        phone: &str,
    ) -> Result<Option<Lead>, RepositoryError>;
    /// Returns the lead and whether this call created it.
    async fn find_or_create(
        &self,
        business_id: &BusinessId,
        phone: &str,
        source: LeadSource,
        now: DateTime<Utc>,
    ) -> Result<(Lead, bool), RepositoryError>;
    async fn save(&self, lead: &Lead) -> Result<(), RepositoryError>;
    async fn list_for_business(
        &self,
        business_id: &BusinessId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Newest open conversation for the lead.
    async fn find_open(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Atomic find-or-create; returns the open conversation and whether it is new.
    async fn find_or_open(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
        call_id: Option<&CallId>,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, bool), RepositoryError>;
    async fn list_open_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Vec<Conversation>, RepositoryError>;
    async fn find_latest_for_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn find_latest_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Returns false when a message with the same provider sid already exists.
    async fn append(&self, message: &Message) -> Result<bool, RepositoryError>;
    async fn exists_provider_sid(&self, provider_sid: &str) -> Result<bool, RepositoryError>;
    /// Oldest first, at most `limit` of the most recent messages.
    async fn list_recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn update_status_by_sid(
        &self,
        provider_sid: &str,
        status: DeliveryStatus,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn find_by_id(&self, id: &CallId) -> Result<Option<Call>, RepositoryError>;
    async fn find_by_sid(&self, call_sid: &str) -> Result<Option<Call>, RepositoryError>;
    async fn find_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<Call>, RepositoryError>;
    /// Inserts unless a call with the same sid exists; returns the stored row.
    async fn record(&self, call: &Call) -> Result<Call, RepositoryError>;
    async fn save(&self, call: &Call) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OptOutRepository: Send + Sync {
    /// Returns false when the row already existed.
    async fn record(&self, opt_out: &OptOut) -> Result<bool, RepositoryError>;
    async fn clear(&self, phone: &str, scope: &OptOutScope) -> Result<u64, RepositoryError>;
    /// Business-scoped or global.
    async fn is_opted_out(
        &self,
        phone: &str,
        business_id: &BusinessId,
    ) -> Result<bool, RepositoryError>;
    async fn list_for_phone(&self, phone: &str) -> Result<Vec<OptOut>, RepositoryError>;
}

#[async_trait]
pub trait ScheduledActionRepository: Send + Sync {
    /// Cancels any pending action of the same kind for the subject and inserts
    /// `action`, in one transaction.
    async fn schedule(&self, action: &ScheduledAction) -> Result<(), RepositoryError>;
    async fn cancel(
        &self,
        subject_id: &str,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
    async fn find_by_id(
        &self,
        id: &ScheduledActionId,
    ) -> Result<Option<ScheduledAction>, RepositoryError>;
    async fn find_pending(
        &self,
        subject_id: &str,
        kind: ActionKind,
    ) -> Result<Option<ScheduledAction>, RepositoryError>;
    /// Moves up to `limit` due pending rows to `claimed` for `worker`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        worker: &str,
        limit: u32,
    ) -> Result<Vec<ScheduledAction>, RepositoryError>;
    /// Returns claims older than `timeout` to `pending`.
    async fn recover_stale(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<u64, RepositoryError>;
    async fn mark_fired(
        &self,
        id: &ScheduledActionId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    /// Re-arms a claimed action; returns false when a newer pending action
    /// superseded it, in which case it is cancelled instead.
    async fn mark_retry(
        &self,
        id: &ScheduledActionId,
        fire_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn mark_failed(
        &self,
        id: &ScheduledActionId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    async fn list(
        &self,
        state: Option<ActionState>,
        limit: u32,
    ) -> Result<Vec<ScheduledAction>, RepositoryError>;
}

#[async_trait]
pub trait OwnerNudgeRepository: Send + Sync {
    async fn find_by_id(&self, id: &OwnerNudgeId) -> Result<Option<OwnerNudge>, RepositoryError>;
    async fn list_pending_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<OwnerNudge>, RepositoryError>;
    async fn save(&self, nudge: &OwnerNudge) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ReviewRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ReviewRequestId,
    ) -> Result<Option<ReviewRequest>, RepositoryError>;
    async fn find_by_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<ReviewRequest>, RepositoryError>;
    async fn save(&self, request: &ReviewRequest) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError>;
    async fn list_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Vec<Appointment>, RepositoryError>;
    async fn save(&self, appointment: &Appointment) -> Result<(), RepositoryError>;
}

/// Every repository the runtime needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub businesses: Arc<dyn BusinessRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub calls: Arc<dyn CallRepository>,
    pub opt_outs: Arc<dyn OptOutRepository>,
    pub actions: Arc<dyn ScheduledActionRepository>,
    pub nudges: Arc<dyn OwnerNudgeRepository>,
    pub reviews: Arc<dyn ReviewRequestRepository>,
    pub appointments: Arc<dyn AppointmentRepository>,
}

impl Repositories {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            businesses: Arc::new(SqlBusinessRepository::new(pool.clone())),
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            calls: Arc::new(SqlCallRepository::new(pool.clone())),
            opt_outs: Arc::new(SqlOptOutRepository::new(pool.clone())),
            actions: Arc::new(SqlScheduledActionRepository::new(pool.clone())),
            nudges: Arc::new(SqlOwnerNudgeRepository::new(pool.clone())),
            reviews: Arc::new(SqlReviewRequestRepository::new(pool.clone())),
            appointments: Arc::new(SqlAppointmentRepository::new(pool)),
        }
    }
}
