use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::domain::conversation::ConversationId;
use callhook_core::domain::message::{
    DeliveryStatus, Direction, Message, MessageId, SenderType,
};

use super::codec::{parse_enum, parse_timestamp, ts};
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: &Message) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO message (
                id, conversation_id, direction, sender_type, body, status, provider_sid, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.as_str())
        .bind(message.conversation_id.as_str())
        .bind(message.direction.as_str())
        .bind(message.sender_type.as_str())
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(message.provider_sid.as_deref())
        .bind(ts(message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn exists_provider_sid(&self, provider_sid: &str) -> Result<bool, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM message WHERE provider_sid = ?")
                .bind(provider_sid)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn list_recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, direction, sender_type, body, status, provider_sid, created_at
             FROM (
                SELECT *, rowid AS seq FROM message
                WHERE conversation_id = ?
                ORDER BY created_at DESC, seq DESC
                LIMIT ?
             )
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn update_status_by_sid(
        &self,
        provider_sid: &str,
        status: DeliveryStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE message SET status = ? WHERE provider_sid = ?")
            .bind(status.as_str())
            .bind(provider_sid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        direction: parse_enum("direction", &row.try_get::<String, _>("direction")?, Direction::parse)?,
        sender_type: parse_enum(
            "sender type",
            &row.try_get::<String, _>("sender_type")?,
            SenderType::parse,
        )?,
        body: row.try_get("body")?,
        status: parse_enum(
            "delivery status",
            &row.try_get::<String, _>("status")?,
            DeliveryStatus::parse,
        )?,
        provider_sid: row.try_get("provider_sid")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
