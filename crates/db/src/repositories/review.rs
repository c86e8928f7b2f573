use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::appointment::AppointmentId;
use callhook_core::domain::business::BusinessId;
use callhook_core::domain::lead::LeadId;
use callhook_core::domain::review::{ReviewRequest, ReviewRequestId, ReviewStatus};

use super::codec::{opt_ts, parse_enum, parse_optional_timestamp, parse_timestamp, ts};
use super::{RepositoryError, ReviewRequestRepository};
use crate::DbPool;

const REVIEW_COLUMNS: &str = "id, business_id, lead_id, appointment_id, status, review_link,
    job_completed_at, sent_at, reminder_sent_at, completed_at, created_at";

pub struct SqlReviewRequestRepository {
    pool: DbPool,
}

impl SqlReviewRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReviewRequestRepository for SqlReviewRequestRepository {
    async fn find_by_id(
        &self,
        id: &ReviewRequestId,
    ) -> Result<Option<ReviewRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM review_request WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(review_from_row).transpose()
    }

    async fn find_by_appointment(
        &self,
        appointment_id: &AppointmentId,
    ) -> Result<Option<ReviewRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM review_request WHERE appointment_id = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(appointment_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(review_from_row).transpose()
    }

    async fn save(&self, request: &ReviewRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO review_request (
                id, business_id, lead_id, appointment_id, status, review_link, job_completed_at,
                sent_at, reminder_sent_at, completed_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                review_link = excluded.review_link,
                sent_at = excluded.sent_at,
                reminder_sent_at = excluded.reminder_sent_at,
                completed_at = excluded.completed_at",
        )
        .bind(request.id.as_str())
        .bind(request.business_id.as_str())
        .bind(request.lead_id.as_str())
        .bind(request.appointment_id.as_str())
        .bind(request.status.as_str())
        .bind(&request.review_link)
        .bind(ts(request.job_completed_at))
        .bind(opt_ts(request.sent_at))
        .bind(opt_ts(request.reminder_sent_at))
        .bind(opt_ts(request.completed_at))
        .bind(ts(request.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn review_from_row(row: SqliteRow) -> Result<ReviewRequest, RepositoryError> {
    Ok(ReviewRequest {
        id: ReviewRequestId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        appointment_id: AppointmentId(row.try_get("appointment_id")?),
        status: parse_enum(
            "review status",
            &row.try_get::<String, _>("status")?,
            ReviewStatus::parse,
        )?,
        review_link: row.try_get("review_link")?,
        job_completed_at: parse_timestamp("job_completed_at", row.try_get("job_completed_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        reminder_sent_at: parse_optional_timestamp(
            "reminder_sent_at",
            row.try_get("reminder_sent_at")?,
        )?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveTime};

    use callhook_core::domain::appointment::{Appointment, NewAppointment};
    use callhook_core::domain::lead::LeadSource;
    use callhook_core::domain::review::{ReviewRequest, ReviewStatus};

    use super::SqlReviewRequestRepository;
    use crate::repositories::test_support::{parse_ts, seed_business, setup_pool};
    use crate::repositories::{
        AppointmentRepository, LeadRepository, ReviewRequestRepository, SqlAppointmentRepository,
        SqlLeadRepository,
    };

    #[tokio::test]
    async fn review_request_is_found_by_appointment() {
        let pool = setup_pool().await;
        let business = seed_business(&pool, "biz-review").await;
        let now = parse_ts("2026-03-01T12:00:00Z");
        let (lead, _) = SqlLeadRepository::new(pool.clone())
            .find_or_create(&business.id, "+15551238888", LeadSource::Manual, now)
            .await
            .expect("lead");
        let appointment = Appointment::book(
            business.id.clone(),
            NewAppointment {
                lead_id: lead.id.clone(),
                conversation_id: None,
                scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).expect("date"),
                scheduled_time: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
                duration_minutes: 90,
                service_type: Some("AC Repair".to_string()),
                address: None,
                notes: None,
            },
            now,
        );
        SqlAppointmentRepository::new(pool.clone()).save(&appointment).await.expect("appointment");

        let repo = SqlReviewRequestRepository::new(pool.clone());
        let mut request = ReviewRequest::pending(
            business.id.clone(),
            lead.id.clone(),
            appointment.id.clone(),
            "https://search.google.com/local/writereview?placeid=ChIJ123".to_string(),
            now,
        );
        repo.save(&request).await.expect("save");

        request.status = ReviewStatus::Sent;
        request.sent_at = Some(now + Duration::hours(2));
        repo.save(&request).await.expect("mark sent");

        let found =
            repo.find_by_appointment(&appointment.id).await.expect("find").expect("request");
        assert_eq!(found, request);
        assert!(found.reminder_due());

        pool.close().await;
    }
}
