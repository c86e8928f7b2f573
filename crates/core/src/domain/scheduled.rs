use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

string_id!(ScheduledActionId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FollowUpNudge,
    ReviewRequest,
    ReviewReminder,
    OwnerNudge,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FollowUpNudge => "follow_up_nudge",
            Self::ReviewRequest => "review_request",
            Self::ReviewReminder => "review_reminder",
            Self::OwnerNudge => "owner_nudge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "follow_up_nudge" => Some(Self::FollowUpNudge),
            "review_request" => Some(Self::ReviewRequest),
            "review_reminder" => Some(Self::ReviewReminder),
            "owner_nudge" => Some(Self::OwnerNudge),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Claimed,
    Fired,
    Cancelled,
    Failed,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Fired => "fired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "fired" => Some(Self::Fired),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Claimed)
    }
}

/// Durable delayed action. `subject_id` is the conversation, review request or
/// owner nudge the action belongs to, depending on `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: ScheduledActionId,
    pub subject_id: String,
    pub kind: ActionKind,
    pub fire_at: DateTime<Utc>,
    pub state: ActionState,
    pub payload: Value,
    pub attempts: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledAction {
    pub fn pending(
        subject_id: impl Into<String>,
        kind: ActionKind,
        fire_at: DateTime<Utc>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduledActionId::generate(),
            subject_id: subject_id.into(),
            kind,
            fire_at,
            state: ActionState::Pending,
            payload,
            attempts: 0,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Follow-up counter captured when a nudge was scheduled.
    pub fn expected_follow_up_count(&self) -> Option<u32> {
        self.payload
            .get("follow_up_count")
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{ActionKind, ScheduledAction};

    #[test]
    fn follow_up_payload_exposes_expected_count() {
        let now = Utc::now();
        let action = ScheduledAction::pending(
            "conv-1",
            ActionKind::FollowUpNudge,
            now,
            json!({ "follow_up_count": 2 }),
            now,
        );
        assert_eq!(action.expected_follow_up_count(), Some(2));

        let bare = ScheduledAction::pending("nudge-1", ActionKind::OwnerNudge, now, json!({}), now);
        assert_eq!(bare.expected_follow_up_count(), None);
    }
}
