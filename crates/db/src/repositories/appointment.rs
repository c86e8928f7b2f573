use chrono::{NaiveDate, NaiveTime};
use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::appointment::{Appointment, AppointmentId, AppointmentStatus};
use callhook_core::domain::business::{hhmm, BusinessId};
use callhook_core::domain::conversation::ConversationId;
use callhook_core::domain::lead::LeadId;

use super::codec::{parse_enum, parse_timestamp, parse_u32, ts};
use super::{AppointmentRepository, RepositoryError};
use crate::DbPool;

const APPOINTMENT_COLUMNS: &str = "id, business_id, lead_id, conversation_id, scheduled_date,
    scheduled_time, duration_minutes, service_type, address, notes, status, calendar_event_id,
    created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE business_id = ? AND id = ?"
        ))
        .bind(business_id.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(appointment_from_row).transpose()
    }

    async fn list_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment
             WHERE business_id = ? AND lead_id = ?
             ORDER BY scheduled_date ASC, scheduled_time ASC"
        ))
        .bind(business_id.as_str())
        .bind(lead_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(appointment_from_row).collect()
    }

    async fn save(&self, appointment: &Appointment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO appointment (
                id, business_id, lead_id, conversation_id, scheduled_date, scheduled_time,
                duration_minutes, service_type, address, notes, status, calendar_event_id,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                scheduled_date = excluded.scheduled_date,
                scheduled_time = excluded.scheduled_time,
                duration_minutes = excluded.duration_minutes,
                service_type = excluded.service_type,
                address = excluded.address,
                notes = excluded.notes,
                status = excluded.status,
                calendar_event_id = excluded.calendar_event_id,
                updated_at = excluded.updated_at",
        )
        .bind(appointment.id.as_str())
        .bind(appointment.business_id.as_str())
        .bind(appointment.lead_id.as_str())
        .bind(appointment.conversation_id.as_ref().map(ConversationId::as_str))
        .bind(appointment.scheduled_date.format(DATE_FORMAT).to_string())
        .bind(appointment.scheduled_time.format("%H:%M").to_string())
        .bind(i64::from(appointment.duration_minutes))
        .bind(appointment.service_type.as_deref())
        .bind(appointment.address.as_deref())
        .bind(appointment.notes.as_deref())
        .bind(appointment.status.as_str())
        .bind(appointment.calendar_event_id.as_deref())
        .bind(ts(appointment.created_at))
        .bind(ts(appointment.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|error| RepositoryError::Decode(format!("invalid scheduled_date `{raw}`: {error}")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, RepositoryError> {
    hhmm::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid scheduled_time `{raw}`")))
}

fn appointment_from_row(row: SqliteRow) -> Result<Appointment, RepositoryError> {
    Ok(Appointment {
        id: AppointmentId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        conversation_id: row.try_get::<Option<String>, _>("conversation_id")?.map(ConversationId),
        scheduled_date: parse_date(&row.try_get::<String, _>("scheduled_date")?)?,
        scheduled_time: parse_time(&row.try_get::<String, _>("scheduled_time")?)?,
        duration_minutes: parse_u32("duration_minutes", row.try_get("duration_minutes")?)?,
        service_type: row.try_get("service_type")?,
        address: row.try_get("address")?,
        notes: row.try_get("notes")?,
        status: parse_enum(
            "appointment status",
            &row.try_get::<String, _>("status")?,
            AppointmentStatus::parse,
        )?,
        calendar_event_id: row.try_get("calendar_event_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use callhook_core::domain::appointment::{Appointment, AppointmentStatus, NewAppointment};
    use callhook_core::domain::lead::LeadSource;

    use super::SqlAppointmentRepository;
    use crate::repositories::test_support::{parse_ts, seed_business, setup_pool};
    use crate::repositories::{AppointmentRepository, LeadRepository, SqlLeadRepository};

    fn booking(lead_id: callhook_core::domain::lead::LeadId, day: u32, hour: u32) -> NewAppointment {
        NewAppointment {
            lead_id,
            conversation_id: None,
            scheduled_date: NaiveDate::from_ymd_opt(2026, 3, day).expect("date"),
            scheduled_time: NaiveTime::from_hms_opt(hour, 0, 0).expect("time"),
            duration_minutes: 60,
            service_type: Some("Furnace Repair".to_string()),
            address: Some("12 Elm St".to_string()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn appointments_round_trip_and_list_in_schedule_order() {
        let pool = setup_pool().await;
        let business = seed_business(&pool, "biz-appt").await;
        let now = parse_ts("2026-03-01T12:00:00Z");
        let (lead, _) = SqlLeadRepository::new(pool.clone())
            .find_or_create(&business.id, "+15551237777", LeadSource::MissedCall, now)
            .await
            .expect("lead");
        let repo = SqlAppointmentRepository::new(pool.clone());

        let later = Appointment::book(business.id.clone(), booking(lead.id.clone(), 5, 8), now);
        let mut sooner = Appointment::book(business.id.clone(), booking(lead.id.clone(), 3, 14), now);
        repo.save(&later).await.expect("save later");
        repo.save(&sooner).await.expect("save sooner");

        sooner.status = AppointmentStatus::Completed;
        sooner.calendar_event_id = Some("evt-1".to_string());
        repo.save(&sooner).await.expect("complete");

        let listed = repo.list_for_lead(&business.id, &lead.id).await.expect("list");
        assert_eq!(listed, vec![sooner.clone(), later]);

        let found = repo.find_by_id(&business.id, &sooner.id).await.expect("find").expect("row");
        assert_eq!(found.status, AppointmentStatus::Completed);

        pool.close().await;
    }
}
