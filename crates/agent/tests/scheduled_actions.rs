mod common;

use chrono::{Duration, NaiveDate, NaiveTime};

use callhook_core::domain::appointment::{AppointmentStatus, NewAppointment};
use callhook_core::domain::conversation::ConversationStatus;
use callhook_core::domain::lead::LeadStatus;
use callhook_core::domain::nudge::NudgeStatus;
use callhook_core::domain::opt_out::{OptOut, OptOutScope};
use callhook_core::domain::review::ReviewStatus;
use callhook_core::domain::scheduled::ActionKind;
use callhook_core::patch::AppointmentPatch;

use common::{midday, Harness, CALLER, OWNER};

async fn pending_fire_at(harness: &Harness, subject: &str, kind: ActionKind) -> Option<chrono::DateTime<chrono::Utc>> {
    harness
        .repos
        .actions
        .find_pending(subject, kind)
        .await
        .expect("pending lookup")
        .map(|action| action.fire_at)
}

async fn qualify(harness: &Harness) {
    harness.missed_call("CA-1").await;
    harness.replies.push_text("Thanks Sam, we'll call you shortly.");
    harness.text("My name is Sam Lee. The furnace quit, I'm at 12 Oak Street", "SM-1").await;
    assert_eq!(harness.lead().await.status, LeadStatus::Qualified);
}

fn appointment_for(harness_lead: &callhook_core::domain::lead::Lead) -> NewAppointment {
    NewAppointment {
        lead_id: harness_lead.id.clone(),
        conversation_id: None,
        scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 13).expect("valid date"),
        scheduled_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        duration_minutes: 60,
        service_type: None,
        address: None,
        notes: None,
    }
}

#[tokio::test]
async fn follow_up_sequence_runs_out_then_closes_unresponsive() {
    let harness = Harness::new().await;
    harness.missed_call("CA-1").await;
    let conversation_id = harness.latest_conversation().await.id;
    let worker = harness.worker();
    let sequence_len = harness.runtime.settings().follow_up.sequence_len();

    for expected in 1..=sequence_len {
        let fire_at = pending_fire_at(&harness, conversation_id.as_str(), ActionKind::FollowUpNudge)
            .await
            .expect("follow-up pending");
        harness.clock.set(fire_at);
        let report = worker.run_once().await.expect("worker poll");
        assert_eq!(report.fired, 1);

        let conversation = harness.latest_conversation().await;
        assert_eq!(conversation.follow_up_count, expected);
        assert_eq!(conversation.status, ConversationStatus::FollowUp);
    }

    let fire_at = pending_fire_at(&harness, conversation_id.as_str(), ActionKind::FollowUpNudge)
        .await
        .expect("closing nudge pending");
    harness.clock.set(fire_at);
    worker.run_once().await.expect("worker poll");

    let conversation = harness.latest_conversation().await;
    assert_eq!(conversation.status, ConversationStatus::ClosedUnresponsive);
    assert_eq!(conversation.follow_up_count, sequence_len, "counter never passes the sequence");
    assert_eq!(harness.lead().await.status, LeadStatus::Unresponsive);
    assert!(pending_fire_at(&harness, conversation_id.as_str(), ActionKind::FollowUpNudge)
        .await
        .is_none());

    let texts = harness.sms.to(CALLER);
    assert_eq!(texts.len(), 1 + sequence_len as usize);
    assert!(texts[1..].iter().all(|text| text.contains("Cool Breeze HVAC")));

    harness.clock.advance(Duration::days(30));
    let idle = worker.run_once().await.expect("worker poll");
    assert_eq!(idle.claimed, 0);
}

#[tokio::test]
async fn reply_before_the_window_pushes_the_follow_up_back() {
    let harness = Harness::new().await;
    harness.missed_call("CA-1").await;
    let conversation_id = harness.latest_conversation().await.id;

    harness.clock.advance(Duration::minutes(90));
    harness.text("my ac is blowing warm air", "SM-1").await;

    let fire_at = pending_fire_at(&harness, conversation_id.as_str(), ActionKind::FollowUpNudge)
        .await
        .expect("follow-up pending");
    assert_eq!(fire_at, midday() + Duration::minutes(90 + 120));

    harness.clock.set(midday() + Duration::minutes(121));
    let report = harness.worker().run_once().await.expect("worker poll");
    assert_eq!(report.claimed, 0, "the original nudge was superseded");
    assert_eq!(harness.latest_conversation().await.follow_up_count, 0);
}

#[tokio::test]
async fn follow_up_is_skipped_for_an_opted_out_recipient() {
    let harness = Harness::new().await;
    harness.missed_call("CA-1").await;
    harness
        .repos
        .opt_outs
        .record(&OptOut {
            phone: CALLER.to_string(),
            scope: OptOutScope::Global,
            created_at: midday(),
        })
        .await
        .expect("record opt-out");

    harness.clock.advance(Duration::minutes(121));
    let report = harness.worker().run_once().await.expect("worker poll");
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.sms.to(CALLER).len(), 1, "only the greeting");
}

#[tokio::test]
async fn owner_is_nudged_about_a_qualified_lead_left_waiting() {
    let harness = Harness::new().await;
    qualify(&harness).await;
    let owner_alerts = harness.sms.to(OWNER).len();

    harness.clock.advance(Duration::minutes(31));
    let report = harness.worker().run_once().await.expect("worker poll");
    assert_eq!(report.fired, 1);
    assert_eq!(harness.sms.to(OWNER).len(), owner_alerts + 1);

    let lead = harness.lead().await;
    let nudges = harness.repos.nudges.list_pending_for_lead(&lead.id).await.expect("nudges");
    assert!(nudges.iter().all(|nudge| nudge.status != NudgeStatus::Pending));
}

#[tokio::test]
async fn booking_retires_the_owner_nudge() {
    let harness = Harness::new().await;
    qualify(&harness).await;
    let lead = harness.lead().await;

    let appointment = harness
        .runtime
        .book_appointment(&harness.business.id, appointment_for(&lead))
        .await
        .expect("booked");
    assert_eq!(appointment.address.as_deref(), Some("12 Oak Street"));
    assert_eq!(appointment.service_type.as_deref(), Some("Furnace Repair"));
    assert_eq!(harness.lead().await.status, LeadStatus::Booked);
    let owner_alerts = harness.sms.to(OWNER).len();

    harness.clock.advance(Duration::minutes(31));
    let report = harness.worker().run_once().await.expect("worker poll");
    assert_eq!(report.fired, 0);
    assert_eq!(harness.sms.to(OWNER).len(), owner_alerts);
}

#[tokio::test]
async fn completed_job_sends_a_review_request_then_one_reminder() {
    let harness = Harness::new().await;
    qualify(&harness).await;
    let lead = harness.lead().await;
    let appointment = harness
        .runtime
        .book_appointment(&harness.business.id, appointment_for(&lead))
        .await
        .expect("booked");

    let completed_at = midday() + Duration::days(2);
    harness.clock.set(completed_at);
    harness
        .runtime
        .update_appointment(
            &harness.business.id,
            &appointment.id,
            &AppointmentPatch { status: Some(AppointmentStatus::Completed), ..AppointmentPatch::default() },
        )
        .await
        .expect("completed");
    assert_eq!(harness.lead().await.status, LeadStatus::Completed);

    let review = harness
        .repos
        .reviews
        .find_by_appointment(&appointment.id)
        .await
        .expect("review lookup")
        .expect("review queued");
    assert_eq!(
        pending_fire_at(&harness, review.id.as_str(), ActionKind::ReviewRequest).await,
        Some(completed_at + Duration::minutes(120))
    );

    let worker = harness.worker();
    let before = harness.sms.to(CALLER).len();
    harness.clock.set(completed_at + Duration::minutes(120));
    assert_eq!(worker.run_once().await.expect("worker poll").fired, 1);
    let texts = harness.sms.to(CALLER);
    assert_eq!(texts.len(), before + 1);
    assert!(texts[before].starts_with("Hi Sam Lee, thanks for choosing Cool Breeze HVAC!"));
    assert!(texts[before].contains("placeid=ChIJ123"));

    let sent = harness.repos.reviews.find_by_id(&review.id).await.expect("lookup").expect("review");
    assert_eq!(sent.status, ReviewStatus::Sent);

    harness.clock.set(completed_at + Duration::minutes(2880));
    assert_eq!(worker.run_once().await.expect("worker poll").fired, 1);
    let texts = harness.sms.to(CALLER);
    assert_eq!(texts.len(), before + 2);
    assert!(texts[before + 1].starts_with("Quick reminder from Cool Breeze HVAC"));

    harness.clock.advance(Duration::days(7));
    assert_eq!(worker.run_once().await.expect("worker poll").claimed, 0);
}

#[tokio::test]
async fn failed_review_send_is_retried() {
    let harness = Harness::new().await;
    qualify(&harness).await;
    let lead = harness.lead().await;
    let appointment = harness
        .runtime
        .book_appointment(&harness.business.id, appointment_for(&lead))
        .await
        .expect("booked");
    harness
        .runtime
        .update_appointment(
            &harness.business.id,
            &appointment.id,
            &AppointmentPatch { status: Some(AppointmentStatus::Completed), ..AppointmentPatch::default() },
        )
        .await
        .expect("completed");

    harness.sms.fail(true);
    harness.clock.advance(Duration::minutes(120));
    let report = harness.worker().run_once().await.expect("worker poll");
    assert_eq!(report.retried, 1);

    let review = harness
        .repos
        .reviews
        .find_by_appointment(&appointment.id)
        .await
        .expect("review lookup")
        .expect("review");
    assert_eq!(review.status, ReviewStatus::Pending);
    assert!(pending_fire_at(&harness, review.id.as_str(), ActionKind::ReviewRequest)
        .await
        .is_some());
}
