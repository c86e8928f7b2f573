use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationStatus;
use crate::notifications::NotificationEvent;

pub type FlowState = ConversationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    /// Caller texted in on an open conversation.
    InboundMessage,
    /// Another missed call arrived while the conversation was still open.
    RepeatCall,
    /// Automated reply went out without any signal tag.
    AutomatedReply,
    Qualified,
    HumanNeeded,
    Emergency,
    FollowUpDue,
    OptOut,
    HumanTakeover,
    ReturnToAi,
}

impl FlowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InboundMessage => "inbound_message",
            Self::RepeatCall => "repeat_call",
            Self::AutomatedReply => "automated_reply",
            Self::Qualified => "qualified",
            Self::HumanNeeded => "human_needed",
            Self::Emergency => "emergency",
            Self::FollowUpDue => "follow_up_due",
            Self::OptOut => "opt_out",
            Self::HumanTakeover => "human_takeover",
            Self::ReturnToAi => "return_to_ai",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    /// Live counter read from the conversation when a nudge fires.
    pub follow_up_count: u32,
    pub sequence_len: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    CancelFollowUp,
    ScheduleFollowUp,
    GenerateReply,
    SendFollowUp,
    NotifyOwner(NotificationEvent),
    MarkLeadQualified,
    MarkLeadUnresponsive,
    MarkLeadOptedOut,
    EscalateUrgency,
    ScheduleOwnerNudge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn has_action(&self, action: FlowAction) -> bool {
        self.actions.contains(&action)
    }
}
