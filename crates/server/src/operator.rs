//! Operator API used by the business-facing dashboard.
//!
//! Every route is scoped by business id except nudge acknowledgement and
//! review completion, whose ids are already unique.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use callhook_agent::{ConversationRuntime, RuntimeError};
use callhook_core::domain::appointment::{AppointmentId, NewAppointment};
use callhook_core::domain::business::BusinessId;
use callhook_core::domain::conversation::ConversationId;
use callhook_core::domain::lead::LeadId;
use callhook_core::domain::nudge::OwnerNudgeId;
use callhook_core::domain::review::ReviewRequestId;
use callhook_core::errors::{ApplicationError, InterfaceError};
use callhook_core::patch::{AppointmentPatch, LeadPatch, SettingsPatch};

#[derive(Clone)]
pub struct OperatorState {
    runtime: Arc<ConversationRuntime>,
}

impl OperatorState {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime }
    }
}

pub fn router(state: OperatorState) -> Router {
    Router::new()
        .route(
            "/api/businesses/{business_id}/conversations/{conversation_id}/takeover",
            post(take_over),
        )
        .route(
            "/api/businesses/{business_id}/conversations/{conversation_id}/return-to-ai",
            post(return_to_ai),
        )
        .route(
            "/api/businesses/{business_id}/conversations/{conversation_id}/messages",
            post(send_message),
        )
        .route("/api/businesses/{business_id}/leads/{lead_id}", patch(update_lead))
        .route("/api/businesses/{business_id}/settings", patch(update_settings))
        .route("/api/businesses/{business_id}/appointments", post(book_appointment))
        .route(
            "/api/businesses/{business_id}/appointments/{appointment_id}",
            patch(update_appointment),
        )
        .route("/api/nudges/{nudge_id}/acknowledge", post(acknowledge_nudge))
        .route("/api/reviews/{review_id}/complete", post(complete_review))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: &'static str,
    pub correlation_id: String,
}

/// Runtime failure mapped onto an HTTP status, tagged with a fresh correlation id.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<RuntimeError> for ApiError {
    fn from(error: RuntimeError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let interface = ApplicationError::from(error).into_interface(correlation_id);
        Self(interface)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                error = %self.0,
                "operator request failed"
            );
        }
        let body = ApiErrorBody {
            error: self.0.to_string(),
            message: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn take_over(
    State(state): State<OperatorState>,
    Path((business_id, conversation_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let conversation = state
        .runtime
        .take_over(&BusinessId(business_id), &ConversationId(conversation_id))
        .await?;
    Ok(Json(json!({ "conversation": conversation })))
}

async fn return_to_ai(
    State(state): State<OperatorState>,
    Path((business_id, conversation_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    let conversation = state
        .runtime
        .return_to_ai(&BusinessId(business_id), &ConversationId(conversation_id))
        .await?;
    Ok(Json(json!({ "conversation": conversation })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualMessage {
    pub body: String,
}

async fn send_message(
    State(state): State<OperatorState>,
    Path((business_id, conversation_id)): Path<(String, String)>,
    Json(message): Json<ManualMessage>,
) -> ApiResult<serde_json::Value> {
    let sid = state
        .runtime
        .send_manual_message(&BusinessId(business_id), &ConversationId(conversation_id), &message.body)
        .await?;
    Ok(Json(json!({ "message_sid": sid })))
}

async fn update_lead(
    State(state): State<OperatorState>,
    Path((business_id, lead_id)): Path<(String, String)>,
    Json(lead_patch): Json<LeadPatch>,
) -> ApiResult<serde_json::Value> {
    let lead = state
        .runtime
        .update_lead(&BusinessId(business_id), &LeadId(lead_id), &lead_patch)
        .await?;
    Ok(Json(json!({ "lead": lead })))
}

async fn update_settings(
    State(state): State<OperatorState>,
    Path(business_id): Path<String>,
    Json(settings): Json<SettingsPatch>,
) -> ApiResult<serde_json::Value> {
    let business = state.runtime.update_settings(&BusinessId(business_id), &settings).await?;
    Ok(Json(json!({ "business": business })))
}

async fn book_appointment(
    State(state): State<OperatorState>,
    Path(business_id): Path<String>,
    Json(input): Json<NewAppointment>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let appointment = state.runtime.book_appointment(&BusinessId(business_id), input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "appointment": appointment }))))
}

async fn update_appointment(
    State(state): State<OperatorState>,
    Path((business_id, appointment_id)): Path<(String, String)>,
    Json(appointment_patch): Json<AppointmentPatch>,
) -> ApiResult<serde_json::Value> {
    let appointment = state
        .runtime
        .update_appointment(&BusinessId(business_id), &AppointmentId(appointment_id), &appointment_patch)
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

async fn acknowledge_nudge(
    State(state): State<OperatorState>,
    Path(nudge_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let nudge = state.runtime.acknowledge_nudge(&OwnerNudgeId(nudge_id)).await?;
    Ok(Json(json!({ "nudge": nudge })))
}

async fn complete_review(
    State(state): State<OperatorState>,
    Path(review_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let review = state.runtime.complete_review(&ReviewRequestId(review_id)).await?;
    Ok(Json(json!({ "review": review })))
}
