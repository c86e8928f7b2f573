use sqlx::{sqlite::SqliteRow, Row};

use callhook_core::channel::LineType;
use callhook_core::domain::business::BusinessId;
use callhook_core::domain::call::{Call, CallId, CallStatus, VoiceDetails};
use callhook_core::domain::lead::LeadId;

use super::codec::{
    parse_enum, parse_optional_decimal, parse_optional_enum, parse_optional_u32, parse_timestamp,
    ts,
};
use super::{CallRepository, RepositoryError};
use crate::DbPool;

const CALL_COLUMNS: &str = "id, business_id, lead_id, call_sid, from_number, to_number, status,
    is_after_hours, duration_secs, line_type, voice_provider_call_id, voice_transcript,
    voice_duration_secs, voice_cost, voice_recording_url, voice_ended_reason, created_at,
    updated_at";

pub struct SqlCallRepository {
    pool: DbPool,
}

impl SqlCallRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Call>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM call WHERE {column} = ? ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(call_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl CallRepository for SqlCallRepository {
    async fn find_by_id(&self, id: &CallId) -> Result<Option<Call>, RepositoryError> {
        self.find_one("id", id.as_str()).await
    }

    async fn find_by_sid(&self, call_sid: &str) -> Result<Option<Call>, RepositoryError> {
        self.find_one("call_sid", call_sid).await
    }

    async fn find_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<Call>, RepositoryError> {
        self.find_one("voice_provider_call_id", provider_call_id).await
    }

    async fn record(&self, call: &Call) -> Result<Call, RepositoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO call (
                id, business_id, lead_id, call_sid, from_number, to_number, status,
                is_after_hours, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(call.id.as_str())
        .bind(call.business_id.as_str())
        .bind(call.lead_id.as_ref().map(LeadId::as_str))
        .bind(&call.call_sid)
        .bind(&call.from_number)
        .bind(&call.to_number)
        .bind(call.status.as_str())
        .bind(call.is_after_hours)
        .bind(ts(call.created_at))
        .bind(ts(call.updated_at))
        .execute(&self.pool)
        .await?;

        self.find_by_sid(&call.call_sid).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("call `{}` vanished after insert", call.call_sid))
        })
    }

    async fn save(&self, call: &Call) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO call (
                id, business_id, lead_id, call_sid, from_number, to_number, status,
                is_after_hours, duration_secs, line_type, voice_provider_call_id,
                voice_transcript, voice_duration_secs, voice_cost, voice_recording_url,
                voice_ended_reason, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                lead_id = excluded.lead_id,
                status = excluded.status,
                duration_secs = excluded.duration_secs,
                line_type = excluded.line_type,
                voice_provider_call_id = excluded.voice_provider_call_id,
                voice_transcript = excluded.voice_transcript,
                voice_duration_secs = excluded.voice_duration_secs,
                voice_cost = excluded.voice_cost,
                voice_recording_url = excluded.voice_recording_url,
                voice_ended_reason = excluded.voice_ended_reason,
                updated_at = excluded.updated_at",
        )
        .bind(call.id.as_str())
        .bind(call.business_id.as_str())
        .bind(call.lead_id.as_ref().map(LeadId::as_str))
        .bind(&call.call_sid)
        .bind(&call.from_number)
        .bind(&call.to_number)
        .bind(call.status.as_str())
        .bind(call.is_after_hours)
        .bind(call.duration_secs.map(i64::from))
        .bind(call.line_type.map(|line_type| line_type.as_str()))
        .bind(call.voice.provider_call_id.as_deref())
        .bind(call.voice.transcript.as_deref())
        .bind(call.voice.duration_secs.map(i64::from))
        .bind(call.voice.cost.map(|cost| cost.to_string()))
        .bind(call.voice.recording_url.as_deref())
        .bind(call.voice.ended_reason.as_deref())
        .bind(ts(call.created_at))
        .bind(ts(call.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn call_from_row(row: SqliteRow) -> Result<Call, RepositoryError> {
    Ok(Call {
        id: CallId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        lead_id: row.try_get::<Option<String>, _>("lead_id")?.map(LeadId),
        call_sid: row.try_get("call_sid")?,
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        status: parse_enum("call status", &row.try_get::<String, _>("status")?, CallStatus::parse)?,
        is_after_hours: row.try_get("is_after_hours")?,
        duration_secs: parse_optional_u32("duration_secs", row.try_get("duration_secs")?)?,
        line_type: parse_optional_enum("line type", row.try_get("line_type")?, LineType::parse)?,
        voice: VoiceDetails {
            provider_call_id: row.try_get("voice_provider_call_id")?,
            transcript: row.try_get("voice_transcript")?,
            duration_secs: parse_optional_u32(
                "voice_duration_secs",
                row.try_get("voice_duration_secs")?,
            )?,
            cost: parse_optional_decimal("voice_cost", row.try_get("voice_cost")?)?,
            recording_url: row.try_get("voice_recording_url")?,
            ended_reason: row.try_get("voice_ended_reason")?,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
