use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::business::BusinessId;
use callhook_core::domain::lead::{Lead, LeadId, LeadSource, LeadStatus, Urgency};

use super::codec::{
    parse_enum, parse_optional_decimal, parse_optional_enum, parse_timestamp, ts,
};
use super::{LeadRepository, RepositoryError};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id, business_id, phone, name, email, address, service_needed, urgency,
    status, source, estimated_value, preferred_time, notes, created_at, updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE business_id = ? AND id = ?"
        ))
        .bind(business_id.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_phone(
        &self,
        business_id: &BusinessId,
        phone: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE business_id = ? AND phone = ?"
        ))
        .bind(business_id.as_str())
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_or_create(
        &self,
        business_id: &BusinessId,
        phone: &str,
        source: LeadSource,
        now: DateTime<Utc>,
    ) -> Result<(Lead, bool), RepositoryError> {
        let candidate = Lead::new(business_id.clone(), phone, source, now);

        // The (business_id, phone) unique key turns a racing duplicate into a no-op.
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO lead (id, business_id, phone, status, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(candidate.id.as_str())
        .bind(business_id.as_str())
        .bind(phone)
        .bind(candidate.status.as_str())
        .bind(source.as_str())
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let lead = self.find_by_phone(business_id, phone).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("lead for `{phone}` vanished after upsert"))
        })?;
        Ok((lead, inserted))
    }

    async fn save(&self, lead: &Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id, business_id, phone, name, email, address, service_needed, urgency, status,
                source, estimated_value, preferred_time, notes, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                address = excluded.address,
                service_needed = excluded.service_needed,
                urgency = excluded.urgency,
                status = excluded.status,
                estimated_value = excluded.estimated_value,
                preferred_time = excluded.preferred_time,
                notes = excluded.notes,
                updated_at = excluded.updated_at",
        )
        .bind(lead.id.as_str())
        .bind(lead.business_id.as_str())
        .bind(&lead.phone)
        .bind(lead.name.as_deref())
        .bind(lead.email.as_deref())
        .bind(lead.address.as_deref())
        .bind(lead.service_needed.as_deref())
        .bind(lead.urgency.map(|urgency| urgency.as_str()))
        .bind(lead.status.as_str())
        .bind(lead.source.as_str())
        .bind(lead.estimated_value.map(|value| value.to_string()))
        .bind(lead.preferred_time.as_deref())
        .bind(lead.notes.as_deref())
        .bind(ts(lead.created_at))
        .bind(ts(lead.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_business(
        &self,
        business_id: &BusinessId,
        limit: u32,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead WHERE business_id = ?
             ORDER BY updated_at DESC LIMIT ?"
        ))
        .bind(business_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(lead_from_row).collect()
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let status = parse_enum("lead status", &row.try_get::<String, _>("status")?, LeadStatus::parse)?;
    let source = parse_enum("lead source", &row.try_get::<String, _>("source")?, LeadSource::parse)?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        phone: row.try_get("phone")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        address: row.try_get("address")?,
        service_needed: row.try_get("service_needed")?,
        urgency: parse_optional_enum("urgency", row.try_get("urgency")?, Urgency::parse)?,
        status,
        source,
        estimated_value: parse_optional_decimal("estimated_value", row.try_get("estimated_value")?)?,
        preferred_time: row.try_get("preferred_time")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
