use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::business::BusinessId;
use callhook_core::domain::opt_out::{OptOut, OptOutScope, GLOBAL_SCOPE_KEY};

use super::codec::{parse_timestamp, ts};
use super::{OptOutRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOptOutRepository {
    pool: DbPool,
}

impl SqlOptOutRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OptOutRepository for SqlOptOutRepository {
    async fn record(&self, opt_out: &OptOut) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO opt_out (phone, scope_key, created_at) VALUES (?, ?, ?)",
        )
        .bind(&opt_out.phone)
        .bind(opt_out.scope.storage_key())
        .bind(ts(opt_out.created_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear(&self, phone: &str, scope: &OptOutScope) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM opt_out WHERE phone = ? AND scope_key = ?")
            .bind(phone)
            .bind(scope.storage_key())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn is_opted_out(
        &self,
        phone: &str,
        business_id: &BusinessId,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM opt_out WHERE phone = ? AND scope_key IN (?, ?)",
        )
        .bind(phone)
        .bind(business_id.as_str())
        .bind(GLOBAL_SCOPE_KEY)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn list_for_phone(&self, phone: &str) -> Result<Vec<OptOut>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT phone, scope_key, created_at FROM opt_out WHERE phone = ? ORDER BY created_at",
        )
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(opt_out_from_row).collect()
    }
}

fn opt_out_from_row(row: SqliteRow) -> Result<OptOut, RepositoryError> {
    Ok(OptOut {
        phone: row.try_get("phone")?,
        scope: OptOutScope::from_storage_key(&row.try_get::<String, _>("scope_key")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
