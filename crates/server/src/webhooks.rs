//! Provider webhooks.
//!
//! Telephony (form-encoded, answered with TwiML):
//! - `POST /webhook/voice/incoming`        record the call and ring the business line
//! - `POST /webhook/voice/call-completed`  answered or missed outcome of the dial
//! - `POST /webhook/sms`                   inbound text
//! - `POST /webhook/sms/status`            outbound delivery status
//!
//! Voice assistant (JSON):
//! - `POST /webhook/vapi/call-ended`       end-of-call report
//! - `POST /webhook/vapi/function-call`    tool invocation during a live call
//!
//! Every handler acknowledges with a success status, even when processing
//! fails, so providers do not pile up retries.

use std::str::FromStr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use callhook_agent::{
    ConversationRuntime, DeliveryStatusUpdate, IncomingCall, InboundCall, InboundSms,
    MissedCallDisposition, TranscriptLine, VoiceEndOfCall, VoiceFunctionCall,
};
use callhook_core::domain::call::CallId;

use crate::adapters::vapi::CALL_ID_METADATA;
use crate::twiml::Twiml;

const DIAL_TIMEOUT_SECS: u32 = 20;
const UNKNOWN_NUMBER: &str = "Sorry, this number is not configured.";
const OPTED_OUT_CALLER: &str = "Sorry we missed your call. Please try again later.";

#[derive(Clone)]
pub struct WebhookState {
    runtime: Arc<ConversationRuntime>,
    public_base_url: String,
}

impl WebhookState {
    pub fn new(runtime: Arc<ConversationRuntime>, public_base_url: &str) -> Self {
        Self { runtime, public_base_url: public_base_url.trim_end_matches('/').to_string() }
    }

    fn callback(&self, path: &str) -> String {
        format!("{}{path}", self.public_base_url)
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/voice/incoming", post(voice_incoming))
        .route("/webhook/voice/call-completed", post(call_completed))
        .route("/webhook/sms", post(sms_inbound))
        .route("/webhook/sms/status", post(sms_status))
        .route("/webhook/vapi/call-ended", post(vapi_call_ended))
        .route("/webhook/vapi/function-call", post(vapi_function_call))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceForm {
    pub from: String,
    pub to: String,
    pub call_sid: String,
    #[serde(default)]
    pub dial_call_status: Option<String>,
    #[serde(default)]
    pub dial_call_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SmsForm {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub message_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusForm {
    pub message_sid: String,
    pub message_status: String,
}

pub async fn voice_incoming(State(state): State<WebhookState>, Form(form): Form<VoiceForm>) -> Twiml {
    let incoming = IncomingCall { from: form.from, to: form.to.clone(), call_sid: form.call_sid };
    match state.runtime.handle_incoming_call(incoming).await {
        Ok(Some(outcome)) => Twiml::new().dial(
            &outcome.forward_to,
            DIAL_TIMEOUT_SECS,
            &state.callback("/webhook/voice/call-completed"),
            Some(&form.to),
        ),
        Ok(None) => Twiml::new().say(UNKNOWN_NUMBER).hangup(),
        Err(error) => {
            error!(event_name = "webhook.voice.incoming_failed", error = %error, "incoming call failed");
            Twiml::new()
        }
    }
}

pub async fn call_completed(State(state): State<WebhookState>, Form(form): Form<VoiceForm>) -> Twiml {
    if form.dial_call_status.as_deref() == Some("completed") {
        let duration = form.dial_call_duration.as_deref().and_then(|raw| raw.trim().parse().ok());
        if let Err(error) = state.runtime.handle_call_answered(&form.call_sid, duration).await {
            error!(
                event_name = "webhook.voice.answered_failed",
                call_sid = %form.call_sid,
                error = %error,
                "could not record answered call"
            );
        }
        return Twiml::new();
    }

    let missed = InboundCall {
        from: form.from,
        to: form.to,
        call_sid: form.call_sid.clone(),
        is_after_hours: None,
    };
    match state.runtime.handle_missed_call(missed).await {
        Ok(outcome) => match (outcome.disposition, outcome.business_name) {
            (MissedCallDisposition::Ignored, _) | (_, None) => Twiml::new(),
            (MissedCallDisposition::OptedOut, _) => Twiml::new().say(OPTED_OUT_CALLER).hangup(),
            (_, Some(name)) => Twiml::new().say(&format!(
                "Sorry we can't take your call right now. We'll text you right away to help. Thanks for calling {name}!"
            )),
        },
        Err(error) => {
            error!(
                event_name = "webhook.voice.missed_failed",
                call_sid = %form.call_sid,
                error = %error,
                "missed call handling failed"
            );
            Twiml::new()
        }
    }
}

pub async fn sms_inbound(State(state): State<WebhookState>, Form(form): Form<SmsForm>) -> Twiml {
    let sms = InboundSms { from: form.from, to: form.to, body: form.body, message_sid: form.message_sid };
    match state.runtime.handle_inbound_sms(sms).await {
        Ok(outcome) => match outcome.reply {
            Some(reply) => Twiml::new().message(&reply),
            None => Twiml::new(),
        },
        Err(error) => {
            error!(event_name = "webhook.sms.failed", error = %error, "inbound sms handling failed");
            Twiml::new()
        }
    }
}

pub async fn sms_status(State(state): State<WebhookState>, Form(form): Form<StatusForm>) -> StatusCode {
    let update = DeliveryStatusUpdate { message_sid: form.message_sid, status: form.message_status };
    if let Err(error) = state.runtime.record_delivery_status(&update).await {
        error!(
            event_name = "webhook.sms.status_failed",
            message_sid = %update.message_sid,
            error = %error,
            "delivery status update failed"
        );
    }
    StatusCode::OK
}

/// Voice assistant server message, reduced to the fields the runtime reads.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VapiMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub call: VapiCall,
    pub transcript: Value,
    pub analysis: VapiAnalysis,
    pub duration_seconds: Option<f64>,
    pub cost: Option<Value>,
    pub recording_url: Option<String>,
    pub ended_reason: Option<String>,
    pub function_call: Option<VapiFunction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VapiCall {
    pub id: Option<String>,
    pub metadata: Map<String, Value>,
    pub duration: Option<f64>,
    pub cost: Option<Value>,
    pub recording_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VapiAnalysis {
    pub structured_data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VapiFunction {
    pub name: String,
    pub parameters: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VapiEnvelope {
    pub message: VapiMessage,
}

impl VapiMessage {
    fn call_id(&self) -> Option<CallId> {
        self.call.metadata.get(CALL_ID_METADATA).and_then(Value::as_str).map(CallId::from)
    }

    fn transcript_lines(&self) -> Vec<TranscriptLine> {
        match &self.transcript {
            Value::Array(items) => items
                .iter()
                .map(|item| TranscriptLine {
                    role: item.get("role").and_then(Value::as_str).unwrap_or("unknown").to_string(),
                    content: item
                        .get("content")
                        .or_else(|| item.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect(),
            Value::String(text) => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| match line.split_once(':') {
                    Some((role, content)) => TranscriptLine {
                        role: role.trim().to_lowercase(),
                        content: content.trim().to_string(),
                    },
                    None => TranscriptLine { role: "unknown".to_string(), content: line.to_string() },
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn into_end_of_call(self) -> VoiceEndOfCall {
        let transcript = self.transcript_lines();
        let duration = self.duration_seconds.or(self.call.duration);
        let cost = self.cost.as_ref().or(self.call.cost.as_ref()).and_then(decimal);
        VoiceEndOfCall {
            call_id: self.call_id(),
            provider_call_id: self.call.id,
            transcript,
            structured_data: self.analysis.structured_data,
            duration_secs: duration.filter(|secs| *secs > 0.0).map(|secs| secs.round() as u32),
            cost,
            recording_url: self.recording_url.or(self.call.recording_url),
            ended_reason: self.ended_reason,
        }
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}

pub async fn vapi_call_ended(
    State(state): State<WebhookState>,
    Json(envelope): Json<VapiEnvelope>,
) -> Json<Value> {
    let message = envelope.message;
    if message.kind != "end-of-call-report" {
        return Json(json!({ "ok": true }));
    }
    match state.runtime.handle_voice_report(message.into_end_of_call()).await {
        Ok(outcome) => {
            info!(
                event_name = "webhook.vapi.report_handled",
                disposition = ?outcome.disposition,
                "voice report handled"
            );
        }
        Err(error) => {
            error!(event_name = "webhook.vapi.report_failed", error = %error, "voice report failed");
        }
    }
    Json(json!({ "ok": true }))
}

pub async fn vapi_function_call(
    State(state): State<WebhookState>,
    Json(envelope): Json<VapiEnvelope>,
) -> Json<Value> {
    let mut message = envelope.message;
    if message.kind != "function-call" {
        return Json(json!({ "result": "ok" }));
    }
    let Some(function) = message.function_call.take() else {
        return Json(json!({ "result": "Missing function" }));
    };
    let call = VoiceFunctionCall {
        call_id: message.call_id(),
        provider_call_id: message.call.id.clone(),
        name: function.name,
        params: function.parameters,
    };
    let result = match state.runtime.handle_voice_function(call).await {
        Ok(result) => result,
        Err(error) => {
            error!(event_name = "webhook.vapi.function_failed", error = %error, "voice function failed");
            "Something went wrong, please continue the call".to_string()
        }
    };
    Json(json!({ "result": result }))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use callhook_core::domain::call::CallStatus;
    use callhook_core::domain::conversation::ConversationStatus;

    use super::{router, VapiEnvelope};
    use crate::test_support::{TestApp, CALLER};

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn text(app: &TestApp, request: Request<Body>) -> (StatusCode, String) {
        let response = router(app.webhooks()).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
    }

    fn caller_form(extra: &str) -> String {
        format!("From=%2B15551234567&To=%2B15557654321&CallSid=CA100{extra}")
    }

    #[tokio::test]
    async fn incoming_call_rings_the_business_line() {
        let app = TestApp::new().await;
        let (status, body) = text(&app, form("/webhook/voice/incoming", &caller_form(""))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<Dial timeout=\"20\" action=\"https://hooks.example.com/webhook/voice/call-completed\""));
        assert!(body.contains("<Number>+15550000002</Number>"));

        let call = app.repos.calls.find_by_sid("CA100").await.expect("lookup").expect("call");
        assert_eq!(call.status, CallStatus::Ringing);
    }

    #[tokio::test]
    async fn incoming_call_to_an_unknown_number_gets_a_neutral_reply() {
        let app = TestApp::new().await;
        let (status, body) = text(
            &app,
            form("/webhook/voice/incoming", "From=%2B15551234567&To=%2B15559999999&CallSid=CA1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<Say>Sorry, this number is not configured.</Say>"));
    }

    #[tokio::test]
    async fn unanswered_dial_starts_the_text_back() {
        let app = TestApp::new().await;
        text(&app, form("/webhook/voice/incoming", &caller_form(""))).await;

        let (status, body) = text(
            &app,
            form("/webhook/voice/call-completed", &caller_form("&DialCallStatus=no-answer")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(
            "<Say>Sorry we can&apos;t take your call right now. We&apos;ll text you right away to help. Thanks for calling Cool Breeze HVAC!</Say>"
        ));
        assert_eq!(app.sms.to(CALLER).len(), 1);

        let call = app.repos.calls.find_by_sid("CA100").await.expect("lookup").expect("call");
        assert_eq!(call.status, CallStatus::Missed);
    }

    #[tokio::test]
    async fn answered_dial_is_recorded_with_its_duration() {
        let app = TestApp::new().await;
        text(&app, form("/webhook/voice/incoming", &caller_form(""))).await;

        let (_, body) = text(
            &app,
            form(
                "/webhook/voice/call-completed",
                &caller_form("&DialCallStatus=completed&DialCallDuration=61"),
            ),
        )
        .await;
        assert!(body.ends_with("<Response></Response>"));
        let call = app.repos.calls.find_by_sid("CA100").await.expect("lookup").expect("call");
        assert_eq!(call.status, CallStatus::Answered);
        assert_eq!(call.duration_secs, Some(61));
        assert!(app.sms.to(CALLER).is_empty());
    }

    #[tokio::test]
    async fn stop_is_acknowledged_inline() {
        let app = TestApp::new().await;
        text(&app, form("/webhook/voice/call-completed", &caller_form("&DialCallStatus=busy"))).await;

        let (_, body) = text(
            &app,
            form("/webhook/sms", "From=%2B15551234567&To=%2B15557654321&Body=Stop&MessageSid=SM1"),
        )
        .await;
        assert!(body.contains(
            "<Message>You&apos;ve been unsubscribed from Cool Breeze HVAC messages. Reply START to re-subscribe.</Message>"
        ));

        let (_, body) = text(
            &app,
            form("/webhook/voice/call-completed", "From=%2B15551234567&To=%2B15557654321&CallSid=CA200&DialCallStatus=no-answer"),
        )
        .await;
        assert!(body.contains("<Say>Sorry we missed your call. Please try again later.</Say>"));
    }

    #[tokio::test]
    async fn ordinary_reply_goes_out_through_the_sender() {
        let app = TestApp::new().await;
        text(&app, form("/webhook/voice/call-completed", &caller_form("&DialCallStatus=busy"))).await;

        let (status, body) = text(
            &app,
            form("/webhook/sms", "From=%2B15551234567&To=%2B15557654321&Body=my+ac+died&MessageSid=SM1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with("<Response></Response>"));
        assert_eq!(app.sms.to(CALLER).len(), 2);
    }

    #[tokio::test]
    async fn delivery_status_updates_the_outbound_message() {
        let app = TestApp::new().await;
        text(&app, form("/webhook/voice/call-completed", &caller_form("&DialCallStatus=busy"))).await;
        let sid = app.sms.last_sid().expect("greeting sid");

        let (status, _) =
            text(&app, form("/webhook/sms/status", &format!("MessageSid={sid}&MessageStatus=delivered"))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            text(&app, form("/webhook/sms/status", "MessageSid=SM-unknown&MessageStatus=delivered")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn vapi_report_is_read_from_the_message_envelope() {
        let envelope: VapiEnvelope = serde_json::from_value(json!({
            "message": {
                "type": "end-of-call-report",
                "endedReason": "customer-ended-call",
                "transcript": "AI: Thanks for calling!\nUser: My furnace quit.",
                "analysis": { "structuredData": { "name": "Sam Lee" } },
                "cost": 0.42,
                "call": {
                    "id": "vapi-call-1",
                    "duration": 141.6,
                    "metadata": { "callhook_call_id": "call-1", "business_id": "biz-1" }
                }
            }
        }))
        .expect("envelope");

        let report = envelope.message.into_end_of_call();
        assert_eq!(report.call_id.as_ref().map(|id| id.as_str()), Some("call-1"));
        assert_eq!(report.provider_call_id.as_deref(), Some("vapi-call-1"));
        assert_eq!(report.duration_secs, Some(142));
        assert_eq!(report.cost, Some(Decimal::new(42, 2)));
        assert_eq!(report.joined_transcript(), "ai: Thanks for calling!\nuser: My furnace quit.");
        assert_eq!(report.structured_data["name"], "Sam Lee");
    }

    #[tokio::test]
    async fn vapi_ignores_other_message_types() {
        let app = TestApp::new().await;
        let response = router(app.webhooks())
            .oneshot(json_request(
                "/webhook/vapi/call-ended",
                json!({ "message": { "type": "status-update" } }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn vapi_function_result_is_returned_to_the_assistant() {
        let app = TestApp::with_voice_ai().await;
        let (_, _) = text(&app, form("/webhook/voice/call-completed", &caller_form("&DialCallStatus=no-answer"))).await;
        let call = app.repos.calls.find_by_sid("CA100").await.expect("lookup").expect("call");

        let response = router(app.webhooks())
            .oneshot(json_request(
                "/webhook/vapi/function-call",
                json!({
                    "message": {
                        "type": "function-call",
                        "functionCall": { "name": "request_human_callback", "parameters": { "reason": "warranty" } },
                        "call": { "id": "vapi-call-1", "metadata": { "callhook_call_id": call.id.as_str() } }
                    }
                }),
            ))
            .await
            .expect("response");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["result"], "Human callback requested");
        assert_eq!(app.latest_conversation().await.status, ConversationStatus::HumanActive);
    }
}
