use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::ConversationStatus;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};
use crate::notifications::NotificationEvent;

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Lifecycle of one engagement thread with a caller.
#[derive(Clone, Debug, Default)]
pub struct ConversationFlow;

impl FlowDefinition for ConversationFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::Active
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_conversation(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", outcome.event.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ConversationFlow> {
    fn default() -> Self {
        Self::new(ConversationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
    #[error("conversation in {state:?} is terminal and accepts no events")]
    Terminal { state: FlowState },
}

fn transition_conversation(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        CancelFollowUp, EscalateUrgency, GenerateReply, MarkLeadOptedOut, MarkLeadQualified,
        MarkLeadUnresponsive, NotifyOwner, ScheduleFollowUp, ScheduleOwnerNudge, SendFollowUp,
    };
    use FlowEvent::{
        AutomatedReply, Emergency, FollowUpDue, HumanNeeded, HumanTakeover, InboundMessage,
        OptOut, Qualified, RepeatCall, ReturnToAi,
    };
    use ConversationStatus::{Active, ClosedOptedOut, ClosedUnresponsive, FollowUp, HumanActive};

    if current.is_terminal() {
        return Err(FlowTransitionError::Terminal { state: *current });
    }

    let (to, actions) = match (current, event) {
        (Active | FollowUp, InboundMessage) => (Active, vec![CancelFollowUp, GenerateReply]),
        (HumanActive, InboundMessage) => {
            (HumanActive, vec![CancelFollowUp, NotifyOwner(NotificationEvent::NewMessage)])
        }
        (Active | FollowUp, RepeatCall) => (Active, vec![CancelFollowUp, ScheduleFollowUp]),
        (HumanActive, RepeatCall) => {
            (HumanActive, vec![CancelFollowUp, NotifyOwner(NotificationEvent::MissedCall)])
        }
        (Active | FollowUp, AutomatedReply) => (Active, vec![ScheduleFollowUp]),
        (_, Qualified) => (
            FlowState::Qualified,
            vec![
                CancelFollowUp,
                MarkLeadQualified,
                NotifyOwner(NotificationEvent::QualifiedLead),
                ScheduleOwnerNudge,
            ],
        ),
        (_, HumanNeeded) => {
            (HumanActive, vec![CancelFollowUp, NotifyOwner(NotificationEvent::HumanNeeded)])
        }
        (_, Emergency) => (
            HumanActive,
            vec![CancelFollowUp, EscalateUrgency, NotifyOwner(NotificationEvent::Emergency)],
        ),
        (Active | FollowUp, FollowUpDue) => {
            if context.follow_up_count >= context.sequence_len {
                (ClosedUnresponsive, vec![MarkLeadUnresponsive])
            } else {
                (FollowUp, vec![SendFollowUp, ScheduleFollowUp])
            }
        }
        (_, OptOut) => (ClosedOptedOut, vec![CancelFollowUp, MarkLeadOptedOut]),
        (Active | FollowUp, HumanTakeover) => (HumanActive, vec![CancelFollowUp]),
        (HumanActive, HumanTakeover) => (HumanActive, Vec::new()),
        (HumanActive, ReturnToAi) => (Active, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{ConversationFlow, FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState};
    use crate::notifications::NotificationEvent;

    fn context(follow_up_count: u32) -> FlowContext {
        FlowContext { follow_up_count, sequence_len: 3 }
    }

    #[test]
    fn inbound_message_cancels_timer_and_asks_for_reply() {
        let engine = FlowEngine::new(ConversationFlow);
        let outcome = engine
            .apply(&FlowState::FollowUp, &FlowEvent::InboundMessage, &FlowContext::default())
            .expect("transition");

        assert_eq!(outcome.to, FlowState::Active);
        assert_eq!(outcome.actions, vec![FlowAction::CancelFollowUp, FlowAction::GenerateReply]);
    }

    #[test]
    fn human_active_never_generates_a_reply() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::HumanActive, &FlowEvent::InboundMessage, &FlowContext::default())
            .expect("transition");

        assert_eq!(outcome.to, FlowState::HumanActive);
        assert!(!outcome.has_action(FlowAction::GenerateReply));
        assert!(outcome.has_action(FlowAction::NotifyOwner(NotificationEvent::NewMessage)));
    }

    #[test]
    fn follow_up_sequence_closes_when_counter_reaches_length() {
        let engine = FlowEngine::default();

        let mid = engine
            .apply(&FlowState::FollowUp, &FlowEvent::FollowUpDue, &context(2))
            .expect("still sending");
        assert_eq!(mid.to, FlowState::FollowUp);
        assert_eq!(mid.actions, vec![FlowAction::SendFollowUp, FlowAction::ScheduleFollowUp]);

        let done = engine
            .apply(&FlowState::FollowUp, &FlowEvent::FollowUpDue, &context(3))
            .expect("close");
        assert_eq!(done.to, FlowState::ClosedUnresponsive);
        assert_eq!(done.actions, vec![FlowAction::MarkLeadUnresponsive]);
    }

    #[test]
    fn follow_up_due_is_rejected_while_a_human_owns_the_thread() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::HumanActive, &FlowEvent::FollowUpDue, &context(0))
            .expect_err("human active");
        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::HumanActive,
                event: FlowEvent::FollowUpDue,
            }
        );
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let engine = FlowEngine::default();
        for state in [FlowState::Qualified, FlowState::ClosedUnresponsive, FlowState::ClosedOptedOut] {
            for event in [FlowEvent::InboundMessage, FlowEvent::FollowUpDue, FlowEvent::OptOut] {
                assert_eq!(
                    engine.apply(&state, &event, &context(0)),
                    Err(FlowTransitionError::Terminal { state })
                );
            }
        }
    }

    #[test]
    fn signals_route_to_qualified_or_human() {
        let engine = FlowEngine::default();

        let qualified =
            engine.apply(&FlowState::Active, &FlowEvent::Qualified, &context(0)).expect("qualified");
        assert_eq!(qualified.to, FlowState::Qualified);
        assert!(qualified.has_action(FlowAction::ScheduleOwnerNudge));

        let emergency =
            engine.apply(&FlowState::Active, &FlowEvent::Emergency, &context(0)).expect("emergency");
        assert_eq!(emergency.to, FlowState::HumanActive);
        assert!(emergency.has_action(FlowAction::NotifyOwner(NotificationEvent::Emergency)));
        assert!(emergency.has_action(FlowAction::EscalateUrgency));
    }

    #[test]
    fn opt_out_closes_any_open_state() {
        let engine = FlowEngine::default();
        for state in FlowState::OPEN {
            let outcome = engine.apply(&state, &FlowEvent::OptOut, &context(0)).expect("opt out");
            assert_eq!(outcome.to, FlowState::ClosedOptedOut);
            assert!(outcome.has_action(FlowAction::MarkLeadOptedOut));
        }
    }

    #[test]
    fn takeover_and_return_round_trip() {
        let engine = FlowEngine::default();
        let taken =
            engine.apply(&FlowState::FollowUp, &FlowEvent::HumanTakeover, &context(0)).expect("take");
        assert_eq!(taken.to, FlowState::HumanActive);
        let back = engine.apply(&taken.to, &FlowEvent::ReturnToAi, &context(0)).expect("return");
        assert_eq!(back.to, FlowState::Active);
        assert!(engine.apply(&FlowState::Active, &FlowEvent::ReturnToAi, &context(0)).is_err());
    }

    #[test]
    fn audit_records_applied_and_rejected_transitions() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, None, "req-1", "conversation-runtime", Utc::now());

        let _ = engine.apply_with_audit(
            &FlowState::Active,
            &FlowEvent::InboundMessage,
            &context(0),
            &sink,
            &audit,
        );
        let _ = engine.apply_with_audit(
            &FlowState::Qualified,
            &FlowEvent::InboundMessage,
            &context(0),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("active"));
        assert_eq!(events[1].event_type, "flow.transition_rejected");
        assert_eq!(events[1].correlation_id, "req-1");
    }
}
