use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::business::BusinessId;
use callhook_core::domain::lead::LeadId;
use callhook_core::domain::nudge::{NudgeStatus, OwnerNudge, OwnerNudgeId};

use super::codec::{opt_ts, parse_enum, parse_optional_timestamp, parse_timestamp, ts};
use super::{OwnerNudgeRepository, RepositoryError};
use crate::DbPool;

const NUDGE_COLUMNS: &str =
    "id, business_id, lead_id, status, sent_at, acknowledged_at, created_at";

pub struct SqlOwnerNudgeRepository {
    pool: DbPool,
}

impl SqlOwnerNudgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OwnerNudgeRepository for SqlOwnerNudgeRepository {
    async fn find_by_id(&self, id: &OwnerNudgeId) -> Result<Option<OwnerNudge>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {NUDGE_COLUMNS} FROM owner_nudge WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(nudge_from_row).transpose()
    }

    async fn list_pending_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<OwnerNudge>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {NUDGE_COLUMNS} FROM owner_nudge
             WHERE lead_id = ? AND status IN ('pending', 'sent')
             ORDER BY created_at ASC"
        ))
        .bind(lead_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(nudge_from_row).collect()
    }

    async fn save(&self, nudge: &OwnerNudge) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO owner_nudge (
                id, business_id, lead_id, status, sent_at, acknowledged_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                sent_at = excluded.sent_at,
                acknowledged_at = excluded.acknowledged_at",
        )
        .bind(nudge.id.as_str())
        .bind(nudge.business_id.as_str())
        .bind(nudge.lead_id.as_str())
        .bind(nudge.status.as_str())
        .bind(opt_ts(nudge.sent_at))
        .bind(opt_ts(nudge.acknowledged_at))
        .bind(ts(nudge.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn nudge_from_row(row: SqliteRow) -> Result<OwnerNudge, RepositoryError> {
    Ok(OwnerNudge {
        id: OwnerNudgeId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        status: parse_enum("nudge status", &row.try_get::<String, _>("status")?, NudgeStatus::parse)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        acknowledged_at: parse_optional_timestamp(
            "acknowledged_at",
            row.try_get("acknowledged_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
