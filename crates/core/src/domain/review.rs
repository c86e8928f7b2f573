use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::appointment::AppointmentId;
use crate::domain::business::BusinessId;
use crate::domain::lead::LeadId;

string_id!(ReviewRequestId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Sent,
    Reviewed,
    Cancelled,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Reviewed => "reviewed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "reviewed" | "completed" => Some(Self::Reviewed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub id: ReviewRequestId,
    pub business_id: BusinessId,
    pub lead_id: LeadId,
    pub appointment_id: AppointmentId,
    pub status: ReviewStatus,
    pub review_link: String,
    pub job_completed_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReviewRequest {
    pub fn pending(
        business_id: BusinessId,
        lead_id: LeadId,
        appointment_id: AppointmentId,
        review_link: String,
        job_completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReviewRequestId::generate(),
            business_id,
            lead_id,
            appointment_id,
            status: ReviewStatus::Pending,
            review_link,
            job_completed_at,
            sent_at: None,
            reminder_sent_at: None,
            completed_at: None,
            created_at: job_completed_at,
        }
    }

    /// A single reminder is allowed while the request is still outstanding.
    pub fn reminder_due(&self) -> bool {
        matches!(self.status, ReviewStatus::Pending | ReviewStatus::Sent)
            && self.reminder_sent_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ReviewRequest, ReviewStatus};

    #[test]
    fn reminder_is_sent_at_most_once() {
        let mut request = ReviewRequest::pending(
            "biz".into(),
            "lead".into(),
            "appt".into(),
            "https://example.com/review".to_string(),
            Utc::now(),
        );
        request.status = ReviewStatus::Sent;
        assert!(request.reminder_due());

        request.reminder_sent_at = Some(Utc::now());
        assert!(!request.reminder_due());

        request.reminder_sent_at = None;
        request.status = ReviewStatus::Reviewed;
        assert!(!request.reminder_due());
    }
}
