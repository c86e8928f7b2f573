use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use callhook_core::domain::business::BusinessId;
use callhook_core::domain::call::CallId;
use callhook_core::domain::conversation::{
    Channel, Conversation, ConversationId, ConversationStatus,
};
use callhook_core::domain::lead::LeadId;

use super::codec::{
    from_json, opt_ts, parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32, to_json,
    ts,
};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id, business_id, lead_id, call_id, status, channel,
    follow_up_count, next_follow_up_at, qualification_data, created_at, updated_at";

const OPEN_FILTER: &str = "status IN ('active', 'follow_up', 'human_active')";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE business_id = ? AND id = ?"
        ))
        .bind(business_id.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_open(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut open = self.list_open_for_lead(business_id, lead_id).await?;
        if open.len() > 1 {
            warn!(
                event_name = "conversation.invariant.duplicate_open",
                business_id = %business_id,
                lead_id = %lead_id,
                open_count = open.len(),
                "more than one open conversation for lead; using the newest"
            );
        }
        Ok(if open.is_empty() { None } else { Some(open.remove(0)) })
    }

    async fn find_or_open(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
        call_id: Option<&CallId>,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<(Conversation, bool), RepositoryError> {
        let candidate =
            Conversation::open(business_id.clone(), lead_id.clone(), call_id.cloned(), channel, now);

        // The partial unique index on open rows makes this a no-op when one exists.
        sqlx::query(
            "INSERT OR IGNORE INTO conversation (
                id, business_id, lead_id, call_id, status, channel, follow_up_count,
                qualification_data, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, 0, '{}', ?, ?)",
        )
        .bind(candidate.id.as_str())
        .bind(business_id.as_str())
        .bind(lead_id.as_str())
        .bind(call_id.map(CallId::as_str))
        .bind(candidate.status.as_str())
        .bind(channel.as_str())
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;

        let conversation = self.find_open(business_id, lead_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("open conversation for lead `{lead_id}` vanished"))
        })?;
        let created = conversation.id == candidate.id;
        Ok((conversation, created))
    }

    async fn list_open_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE business_id = ? AND lead_id = ? AND {OPEN_FILTER}
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(business_id.as_str())
        .bind(lead_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    async fn find_latest_for_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE call_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(call_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_latest_for_lead(
        &self,
        business_id: &BusinessId,
        lead_id: &LeadId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE business_id = ? AND lead_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(business_id.as_str())
        .bind(lead_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (
                id, business_id, lead_id, call_id, status, channel, follow_up_count,
                next_follow_up_at, qualification_data, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                call_id = excluded.call_id,
                status = excluded.status,
                channel = excluded.channel,
                follow_up_count = excluded.follow_up_count,
                next_follow_up_at = excluded.next_follow_up_at,
                qualification_data = excluded.qualification_data,
                updated_at = excluded.updated_at",
        )
        .bind(conversation.id.as_str())
        .bind(conversation.business_id.as_str())
        .bind(conversation.lead_id.as_str())
        .bind(conversation.call_id.as_ref().map(CallId::as_str))
        .bind(conversation.status.as_str())
        .bind(conversation.channel.as_str())
        .bind(i64::from(conversation.follow_up_count))
        .bind(opt_ts(conversation.next_follow_up_at))
        .bind(to_json("qualification_data", &conversation.qualification_data)?)
        .bind(ts(conversation.created_at))
        .bind(ts(conversation.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let status = parse_enum(
        "conversation status",
        &row.try_get::<String, _>("status")?,
        ConversationStatus::parse,
    )?;
    let channel = parse_enum("channel", &row.try_get::<String, _>("channel")?, Channel::parse)?;
    let scratch_raw = row.try_get::<String, _>("qualification_data")?;
    let qualification_data = match from_json::<Value>("qualification_data", &scratch_raw)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        call_id: row.try_get::<Option<String>, _>("call_id")?.map(CallId),
        status,
        channel,
        follow_up_count: parse_u32("follow_up_count", row.try_get("follow_up_count")?)?,
        next_follow_up_at: parse_optional_timestamp(
            "next_follow_up_at",
            row.try_get("next_follow_up_at")?,
        )?,
        qualification_data,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
