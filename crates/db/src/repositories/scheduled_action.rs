use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::scheduled::{
    ActionKind, ActionState, ScheduledAction, ScheduledActionId,
};

use super::codec::{
    from_json, opt_ts, parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32, to_json,
    ts,
};
use super::{RepositoryError, ScheduledActionRepository};
use crate::DbPool;

const ACTION_COLUMNS: &str = "id, subject_id, kind, fire_at, state, payload, attempts, claimed_by,
    claimed_at, last_error, created_at, updated_at";

pub struct SqlScheduledActionRepository {
    pool: DbPool,
}

impl SqlScheduledActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScheduledActionRepository for SqlScheduledActionRepository {
    async fn schedule(&self, action: &ScheduledAction) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE scheduled_action
             SET state = 'cancelled', updated_at = ?
             WHERE subject_id = ? AND kind = ? AND state = 'pending'",
        )
        .bind(ts(action.created_at))
        .bind(&action.subject_id)
        .bind(action.kind.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO scheduled_action (
                id, subject_id, kind, fire_at, state, payload, attempts, claimed_by, claimed_at,
                last_error, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(action.id.as_str())
        .bind(&action.subject_id)
        .bind(action.kind.as_str())
        .bind(ts(action.fire_at))
        .bind(action.state.as_str())
        .bind(to_json("payload", &action.payload)?)
        .bind(i64::from(action.attempts))
        .bind(action.claimed_by.as_deref())
        .bind(opt_ts(action.claimed_at))
        .bind(action.last_error.as_deref())
        .bind(ts(action.created_at))
        .bind(ts(action.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel(
        &self,
        subject_id: &str,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE scheduled_action
             SET state = 'cancelled', updated_at = ?
             WHERE subject_id = ? AND kind = ? AND state = 'pending'",
        )
        .bind(ts(now))
        .bind(subject_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_by_id(
        &self,
        id: &ScheduledActionId,
    ) -> Result<Option<ScheduledAction>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {ACTION_COLUMNS} FROM scheduled_action WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(action_from_row).transpose()
    }

    async fn find_pending(
        &self,
        subject_id: &str,
        kind: ActionKind,
    ) -> Result<Option<ScheduledAction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM scheduled_action
             WHERE subject_id = ? AND kind = ? AND state = 'pending'"
        ))
        .bind(subject_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(action_from_row).transpose()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        worker: &str,
        limit: u32,
    ) -> Result<Vec<ScheduledAction>, RepositoryError> {
        // Single statement, so two workers can never claim the same row.
        let rows = sqlx::query(&format!(
            "UPDATE scheduled_action
             SET state = 'claimed', claimed_by = ?, claimed_at = ?, attempts = attempts + 1,
                 updated_at = ?
             WHERE id IN (
                SELECT id FROM scheduled_action
                WHERE state = 'pending' AND fire_at <= ?
                ORDER BY fire_at ASC
                LIMIT ?
             )
             RETURNING {ACTION_COLUMNS}"
        ))
        .bind(worker)
        .bind(ts(now))
        .bind(ts(now))
        .bind(ts(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows.into_iter().map(action_from_row).collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by(|left, right| left.fire_at.cmp(&right.fire_at));
        Ok(claimed)
    }

    async fn recover_stale(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<u64, RepositoryError> {
        let cutoff = ts(now - timeout);
        let mut tx = self.pool.begin().await?;

        // A stale claim that has since been superseded must not become a second pending row.
        let superseded = sqlx::query(
            "UPDATE scheduled_action AS stale
             SET state = 'cancelled', last_error = 'superseded while claimed', updated_at = ?
             WHERE stale.state = 'claimed' AND stale.claimed_at <= ?
               AND EXISTS (
                 SELECT 1 FROM scheduled_action AS live
                 WHERE live.subject_id = stale.subject_id AND live.kind = stale.kind
                   AND live.state = 'pending'
               )",
        )
        .bind(ts(now))
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let recovered = sqlx::query(
            "UPDATE scheduled_action
             SET state = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?
             WHERE state = 'claimed' AND claimed_at <= ?",
        )
        .bind(ts(now))
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::debug!(superseded, recovered, "stale scheduled action claims processed");
        Ok(recovered)
    }

    async fn mark_fired(
        &self,
        id: &ScheduledActionId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE scheduled_action SET state = 'fired', last_error = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(ts(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &ScheduledActionId,
        fire_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let rearmed = sqlx::query(
            "UPDATE scheduled_action AS retry
             SET state = 'pending', fire_at = ?, last_error = ?, claimed_by = NULL,
                 claimed_at = NULL, updated_at = ?
             WHERE retry.id = ?
               AND NOT EXISTS (
                 SELECT 1 FROM scheduled_action AS live
                 WHERE live.subject_id = retry.subject_id AND live.kind = retry.kind
                   AND live.state = 'pending'
               )",
        )
        .bind(ts(fire_at))
        .bind(error)
        .bind(ts(now))
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !rearmed {
            sqlx::query(
                "UPDATE scheduled_action SET state = 'cancelled', last_error = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(error)
            .bind(ts(now))
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rearmed)
    }

    async fn mark_failed(
        &self,
        id: &ScheduledActionId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE scheduled_action SET state = 'failed', last_error = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(ts(now))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        state: Option<ActionState>,
        limit: u32,
    ) -> Result<Vec<ScheduledAction>, RepositoryError> {
        let rows = if let Some(state) = state {
            sqlx::query(&format!(
                "SELECT {ACTION_COLUMNS} FROM scheduled_action WHERE state = ?
                 ORDER BY fire_at ASC LIMIT ?"
            ))
            .bind(state.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {ACTION_COLUMNS} FROM scheduled_action ORDER BY fire_at ASC LIMIT ?"
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(action_from_row).collect()
    }
}

fn action_from_row(row: SqliteRow) -> Result<ScheduledAction, RepositoryError> {
    let payload_raw = row.try_get::<String, _>("payload")?;

    Ok(ScheduledAction {
        id: ScheduledActionId(row.try_get("id")?),
        subject_id: row.try_get("subject_id")?,
        kind: parse_enum("action kind", &row.try_get::<String, _>("kind")?, ActionKind::parse)?,
        fire_at: parse_timestamp("fire_at", row.try_get("fire_at")?)?,
        state: parse_enum("action state", &row.try_get::<String, _>("state")?, ActionState::parse)?,
        payload: from_json::<Value>("payload", &payload_raw)?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
