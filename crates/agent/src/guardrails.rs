//! Last check before an SMS leaves the system. Every outbound text is
//! evaluated here after state has been committed.

use callhook_core::channel::{can_receive_sms, LineType};
use callhook_core::domain::conversation::ConversationStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Greeting,
    Reply,
    FollowUp,
    /// Opt-out/opt-in acknowledgements and booking confirmations.
    Confirmation,
    ReviewRequest,
    /// Typed by an operator.
    Manual,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Reply => "reply",
            Self::FollowUp => "follow_up",
            Self::Confirmation => "confirmation",
            Self::ReviewRequest => "review_request",
            Self::Manual => "manual",
        }
    }

    fn is_automated_conversation_turn(&self) -> bool {
        matches!(self, Self::Greeting | Self::Reply | Self::FollowUp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboundIntent {
    pub kind: MessageKind,
    pub conversation_status: Option<ConversationStatus>,
    pub recipient_opted_out: bool,
    pub line_type: Option<LineType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, detail: String },
    Degrade { reason_code: &'static str, detail: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    /// Follow-up nudges only go to conversations the automation still owns.
    pub follow_up_requires_automated_state: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { follow_up_requires_automated_state: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &OutboundIntent) -> GuardrailDecision {
        if intent.recipient_opted_out {
            return GuardrailDecision::Deny {
                reason_code: "recipient_opted_out",
                detail: "recipient opted out of messages from this business".to_string(),
            };
        }

        if let Some(line_type) = intent.line_type {
            if !can_receive_sms(line_type) {
                return GuardrailDecision::Degrade {
                    reason_code: "landline_cannot_receive_sms",
                    detail: "caller line is a landline".to_string(),
                    fallback_path: "owner_callback",
                };
            }
        }

        match (intent.kind, intent.conversation_status) {
            (kind, Some(ConversationStatus::HumanActive))
                if kind.is_automated_conversation_turn() =>
            {
                GuardrailDecision::Deny {
                    reason_code: "human_owns_conversation",
                    detail: format!("{} suppressed while a human is active", kind.as_str()),
                }
            }
            (MessageKind::FollowUp, Some(status))
                if self.follow_up_requires_automated_state && !status.is_automated() =>
            {
                GuardrailDecision::Deny {
                    reason_code: "conversation_not_automated",
                    detail: format!("follow-up suppressed for {} conversation", status.as_str()),
                }
            }
            (MessageKind::Reply | MessageKind::Greeting, Some(status)) if status.is_terminal() => {
                if status == ConversationStatus::Qualified {
                    GuardrailDecision::Allow
                } else {
                    GuardrailDecision::Deny {
                        reason_code: "conversation_closed",
                        detail: format!("conversation is {}", status.as_str()),
                    }
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}
