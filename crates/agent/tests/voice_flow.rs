mod common;

use rust_decimal::Decimal;
use serde_json::json;

use callhook_agent::{
    MissedCallDisposition, TranscriptLine, VoiceEndOfCall, VoiceFunctionCall,
    VoiceReportDisposition,
};
use callhook_core::domain::conversation::ConversationStatus;
use callhook_core::domain::lead::{LeadStatus, Urgency};
use callhook_core::domain::scheduled::ActionKind;

use common::{ts, Harness, CALLER, OWNER};

async fn transferred() -> Harness {
    let harness = Harness::with_voice_ai().await;
    harness.voice.answer_with("vapi-call-1");
    let outcome = harness.missed_call("CA-1").await;
    assert_eq!(outcome.disposition, MissedCallDisposition::VoiceTransferred);
    harness
}

fn report(structured_data: serde_json::Value) -> VoiceEndOfCall {
    VoiceEndOfCall {
        provider_call_id: Some("vapi-call-1".to_string()),
        transcript: vec![
            TranscriptLine {
                role: "assistant".to_string(),
                content: "Thanks for calling, what's going on?".to_string(),
            },
            TranscriptLine { role: "user".to_string(), content: "The AC won't cool.".to_string() },
        ],
        structured_data,
        duration_secs: Some(142),
        ended_reason: Some("customer-ended-call".to_string()),
        ..VoiceEndOfCall::default()
    }
}

fn function(name: &str, params: serde_json::Value) -> VoiceFunctionCall {
    VoiceFunctionCall {
        call_id: None,
        provider_call_id: Some("vapi-call-1".to_string()),
        name: name.to_string(),
        params,
    }
}

#[tokio::test]
async fn complete_voice_report_qualifies_and_confirms_by_text() {
    let harness = transferred().await;

    let outcome = harness
        .runtime
        .handle_voice_report(report(json!({
            "name": "Sam Lee",
            "service_needed": "AC Repair",
            "address": "12 Oak Street",
            "urgency": "high"
        })))
        .await
        .expect("report handled");
    assert_eq!(outcome.disposition, VoiceReportDisposition::Qualified);

    let lead = harness.lead().await;
    assert_eq!(lead.status, LeadStatus::Qualified);
    assert_eq!(lead.estimated_value, Some(Decimal::new(350, 0)));
    assert_eq!(lead.urgency, Some(Urgency::High));

    let conversation = harness.latest_conversation().await;
    assert_eq!(conversation.status, ConversationStatus::Qualified);
    assert!(conversation.qualification_data.contains_key("transcript"));
    assert_eq!(
        conversation.qualification_data.get("ended_reason"),
        Some(&json!("customer-ended-call"))
    );

    assert_eq!(
        harness.sms.to(CALLER),
        vec![
            "Thanks for calling Cool Breeze HVAC, Sam Lee! Confirming: AC Repair at 12 Oak Street. Someone will call to confirm the time. Text this number anytime if you need anything!"
                .to_string()
        ]
    );
    assert_eq!(harness.sms.to(OWNER).len(), 1, "qualified lead alert");

    let call = harness.repos.calls.find_by_sid("CA-1").await.expect("call lookup").expect("call");
    assert_eq!(call.voice.duration_secs, Some(142));
    assert!(call.voice.transcript.as_deref().is_some_and(|text| text.contains("won't cool")));
}

#[tokio::test]
async fn emergency_report_reaches_the_owner_during_quiet_hours() {
    let harness = transferred().await;
    harness.clock.set(ts("2026-03-12T03:00:00Z"));

    let outcome = harness
        .runtime
        .handle_voice_report(report(json!({ "name": "Sam Lee", "urgency": "emergency" })))
        .await
        .expect("report handled");
    assert_eq!(outcome.disposition, VoiceReportDisposition::Emergency);

    assert_eq!(harness.lead().await.urgency, Some(Urgency::Emergency));
    assert_eq!(harness.latest_conversation().await.status, ConversationStatus::HumanActive);
    assert_eq!(harness.sms.to(OWNER).len(), 1);
}

#[tokio::test]
async fn voice_qualified_lead_is_priced_from_the_matching_service() {
    let harness = transferred().await;
    harness.seed_service("AC Repair", 189).await;

    harness
        .runtime
        .handle_voice_report(report(json!({
            "name": "Sam Lee",
            "service_needed": "ac repair",
            "address": "12 Oak Street"
        })))
        .await
        .expect("report handled");

    let lead = harness.lead().await;
    assert_eq!(lead.status, LeadStatus::Qualified);
    assert_eq!(lead.estimated_value, Some(Decimal::new(189, 0)));
}

#[tokio::test]
async fn qualified_emergency_report_closes_as_qualified_and_arms_the_owner_nudge() {
    let harness = transferred().await;

    let outcome = harness
        .runtime
        .handle_voice_report(report(json!({
            "name": "Sam Lee",
            "service_needed": "AC Repair",
            "address": "12 Oak Street",
            "urgency": "emergency"
        })))
        .await
        .expect("report handled");
    assert_eq!(outcome.disposition, VoiceReportDisposition::Emergency);

    let lead = harness.lead().await;
    assert_eq!(lead.status, LeadStatus::Qualified);
    assert_eq!(lead.urgency, Some(Urgency::Emergency));
    assert_eq!(harness.latest_conversation().await.status, ConversationStatus::Qualified);

    let nudges = harness.repos.nudges.list_pending_for_lead(&lead.id).await.expect("nudges");
    assert_eq!(nudges.len(), 1);
    assert!(harness
        .repos
        .actions
        .find_pending(nudges[0].id.as_str(), ActionKind::OwnerNudge)
        .await
        .expect("pending lookup")
        .is_some());

    assert_eq!(
        harness.sms.to(OWNER),
        vec!["EMERGENCY lead! Check your dashboard and call them immediately.".to_string()]
    );
    assert_eq!(harness.sms.to(CALLER).len(), 1, "confirmation text");
}

#[tokio::test]
async fn cut_off_call_is_picked_up_over_text() {
    let harness = transferred().await;

    let outcome = harness
        .runtime
        .handle_voice_report(report(json!({ "name": "Sam Lee" })))
        .await
        .expect("report handled");
    assert_eq!(outcome.disposition, VoiceReportDisposition::FollowingUp);

    assert_eq!(
        harness.sms.to(CALLER),
        vec![
            "Hey! This is Cool Breeze HVAC. Looks like we got disconnected. What time works best to get you scheduled?"
                .to_string()
        ]
    );
    let conversation = harness.latest_conversation().await;
    assert_eq!(conversation.status, ConversationStatus::Active);
    assert!(conversation.next_follow_up_at.is_some());
    assert_eq!(harness.sms.to(OWNER).len(), 1, "owner hears about the missed call");
}

#[tokio::test]
async fn report_for_an_unknown_call_is_ignored() {
    let harness = Harness::new().await;
    let mut unknown = report(json!({}));
    unknown.provider_call_id = Some("vapi-unknown".to_string());

    let outcome = harness.runtime.handle_voice_report(unknown).await.expect("handled");
    assert_eq!(outcome.disposition, VoiceReportDisposition::Ignored);
    assert!(harness.sms.to(OWNER).is_empty());
}

#[tokio::test]
async fn save_lead_info_merges_without_overwriting() {
    let harness = transferred().await;

    let result = harness
        .runtime
        .handle_voice_function(function(
            "save_lead_info",
            json!({ "name": "Sam Lee", "service_needed": "Furnace Repair" }),
        ))
        .await
        .expect("function handled");
    assert_eq!(result, "Lead info saved");

    harness
        .runtime
        .handle_voice_function(function("save_lead_info", json!({ "name": "Samuel" })))
        .await
        .expect("function handled");

    let lead = harness.lead().await;
    assert_eq!(lead.name.as_deref(), Some("Sam Lee"));
    assert_eq!(lead.service_needed.as_deref(), Some("Furnace Repair"));
    assert_eq!(lead.status, LeadStatus::Qualifying);
}

#[tokio::test]
async fn flag_emergency_escalates_mid_call() {
    let harness = transferred().await;

    let result = harness
        .runtime
        .handle_voice_function(function("flag_emergency", json!({ "reason": "gas smell" })))
        .await
        .expect("function handled");
    assert_eq!(result, "Emergency flagged, owner notified");
    assert_eq!(harness.lead().await.urgency, Some(Urgency::Emergency));
    assert_eq!(harness.latest_conversation().await.status, ConversationStatus::HumanActive);
    assert_eq!(harness.sms.to(OWNER).len(), 1);
}

#[tokio::test]
async fn unknown_function_is_reported_back_to_the_assistant() {
    let harness = transferred().await;
    let result = harness
        .runtime
        .handle_voice_function(function("book_appointment", json!({})))
        .await
        .expect("function handled");
    assert_eq!(result, "Unknown function: book_appointment");
}
