use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::business::{Business, BusinessId, Service, ServiceId};

use super::codec::{
    from_json, parse_decimal, parse_optional_decimal, parse_timestamp, parse_u32, to_json, ts,
};
use super::{BusinessRepository, RepositoryError};
use crate::DbPool;

const BUSINESS_COLUMNS: &str = "id, name, owner_name, owner_email, owner_phone, business_phone,
    twilio_number, timezone, business_hours_json, avg_job_value, ai_greeting, ai_instructions,
    notification_prefs_json, google_place_id, voice_assistant_id, calendar_refresh_token,
    created_at, updated_at";

pub struct SqlBusinessRepository {
    pool: DbPool,
}

impl SqlBusinessRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BusinessRepository for SqlBusinessRepository {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<Business>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BUSINESS_COLUMNS} FROM business WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(business_from_row).transpose()
    }

    async fn find_by_twilio_number(
        &self,
        number: &str,
    ) -> Result<Option<Business>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {BUSINESS_COLUMNS} FROM business WHERE twilio_number = ?"
        ))
        .bind(number.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(business_from_row).transpose()
    }

    async fn save(&self, business: &Business) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business (
                id, name, owner_name, owner_email, owner_phone, business_phone, twilio_number,
                timezone, business_hours_json, avg_job_value, ai_greeting, ai_instructions,
                notification_prefs_json, google_place_id, voice_assistant_id,
                calendar_refresh_token, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_name = excluded.owner_name,
                owner_email = excluded.owner_email,
                owner_phone = excluded.owner_phone,
                business_phone = excluded.business_phone,
                twilio_number = excluded.twilio_number,
                timezone = excluded.timezone,
                business_hours_json = excluded.business_hours_json,
                avg_job_value = excluded.avg_job_value,
                ai_greeting = excluded.ai_greeting,
                ai_instructions = excluded.ai_instructions,
                notification_prefs_json = excluded.notification_prefs_json,
                google_place_id = excluded.google_place_id,
                voice_assistant_id = excluded.voice_assistant_id,
                calendar_refresh_token = excluded.calendar_refresh_token,
                updated_at = excluded.updated_at",
        )
        .bind(business.id.as_str())
        .bind(&business.name)
        .bind(&business.owner_name)
        .bind(&business.owner_email)
        .bind(&business.owner_phone)
        .bind(&business.business_phone)
        .bind(&business.twilio_number)
        .bind(&business.timezone)
        .bind(to_json("business_hours_json", &business.business_hours)?)
        .bind(business.avg_job_value.to_string())
        .bind(business.ai_greeting.as_deref())
        .bind(business.ai_instructions.as_deref())
        .bind(to_json("notification_prefs_json", &business.notification_prefs)?)
        .bind(business.google_place_id.as_deref())
        .bind(business.voice_assistant_id.as_deref())
        .bind(business.calendar_refresh_token.as_deref())
        .bind(ts(business.created_at))
        .bind(ts(business.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_services(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, price, duration_minutes, is_bookable, is_active, sort_order
             FROM service
             WHERE business_id = ?
             ORDER BY sort_order ASC, name ASC",
        )
        .bind(business_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(service_from_row).collect()
    }

    async fn save_service(&self, service: &Service) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO service (
                id, business_id, name, price, duration_minutes, is_bookable, is_active, sort_order
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                duration_minutes = excluded.duration_minutes,
                is_bookable = excluded.is_bookable,
                is_active = excluded.is_active,
                sort_order = excluded.sort_order",
        )
        .bind(service.id.as_str())
        .bind(service.business_id.as_str())
        .bind(&service.name)
        .bind(service.price.map(|price| price.to_string()))
        .bind(i64::from(service.duration_minutes))
        .bind(service.is_bookable)
        .bind(service.is_active)
        .bind(service.sort_order)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn business_from_row(row: SqliteRow) -> Result<Business, RepositoryError> {
    let hours_raw = row.try_get::<String, _>("business_hours_json")?;
    let prefs_raw = row.try_get::<String, _>("notification_prefs_json")?;

    Ok(Business {
        id: BusinessId(row.try_get("id")?),
        name: row.try_get("name")?,
        owner_name: row.try_get("owner_name")?,
        owner_email: row.try_get("owner_email")?,
        owner_phone: row.try_get("owner_phone")?,
        business_phone: row.try_get("business_phone")?,
        twilio_number: row.try_get("twilio_number")?,
        timezone: row.try_get("timezone")?,
        business_hours: from_json("business_hours_json", &hours_raw)?,
        avg_job_value: parse_decimal("avg_job_value", row.try_get("avg_job_value")?)?,
        ai_greeting: row.try_get("ai_greeting")?,
        ai_instructions: row.try_get("ai_instructions")?,
        notification_prefs: from_json("notification_prefs_json", &prefs_raw)?,
        google_place_id: row.try_get("google_place_id")?,
        voice_assistant_id: row.try_get("voice_assistant_id")?,
        calendar_refresh_token: row.try_get("calendar_refresh_token")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn service_from_row(row: SqliteRow) -> Result<Service, RepositoryError> {
    Ok(Service {
        id: ServiceId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        name: row.try_get("name")?,
        price: parse_optional_decimal("price", row.try_get("price")?)?,
        duration_minutes: parse_u32("duration_minutes", row.try_get("duration_minutes")?)?,
        is_bookable: row.try_get("is_bookable")?,
        is_active: row.try_get("is_active")?,
        sort_order: row.try_get("sort_order")?,
    })
}
