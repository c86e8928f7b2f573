use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR, DbPool};

    const MANAGED_TABLES: &[&str] = &[
        "business",
        "service",
        "lead",
        "call",
        "conversation",
        "message",
        "opt_out",
        "scheduled_action",
        "owner_nudge",
        "appointment",
        "review_request",
    ];

    const MANAGED_INDEXES: &[&str] = &[
        "idx_lead_business_status",
        "idx_call_voice_provider_call_id",
        "idx_conversation_one_open",
        "idx_conversation_lead",
        "idx_message_conversation",
        "idx_scheduled_action_one_pending",
        "idx_scheduled_action_due",
        "idx_owner_nudge_lead",
    ];

    async fn count_objects(pool: &DbPool, kind: &str, names: &[&str]) -> usize {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = ?")
            .bind(kind)
            .fetch_all(pool)
            .await
            .expect("load schema objects");
        rows.iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| names.contains(&name.as_str()))
            .count()
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        assert_eq!(count_objects(&pool, "table", MANAGED_TABLES).await, MANAGED_TABLES.len());
        assert_eq!(count_objects(&pool, "index", MANAGED_INDEXES).await, MANAGED_INDEXES.len());
    }

    #[tokio::test]
    async fn open_conversation_index_rejects_a_second_open_row() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        let ts = "2026-03-01T12:00:00.000000Z";

        sqlx::query(
            "INSERT INTO business (id, name, owner_name, owner_email, owner_phone, business_phone,
                                   twilio_number, created_at, updated_at)
             VALUES ('b1', 'Cool Breeze', 'Dana', 'd@example.com', '+1555', '+1556', '+1557', ?, ?)",
        )
        .bind(ts)
        .bind(ts)
        .execute(&pool)
        .await
        .expect("insert business");
        sqlx::query(
            "INSERT INTO lead (id, business_id, phone, source, created_at, updated_at)
             VALUES ('l1', 'b1', '+15551230000', 'missed_call', ?, ?)",
        )
        .bind(ts)
        .bind(ts)
        .execute(&pool)
        .await
        .expect("insert lead");

        let insert = "INSERT INTO conversation (id, business_id, lead_id, status, channel, created_at, updated_at)
                      VALUES (?, 'b1', 'l1', ?, 'sms', ?, ?)";
        sqlx::query(insert).bind("c1").bind("active").bind(ts).bind(ts).execute(&pool).await.expect("first");
        let duplicate =
            sqlx::query(insert).bind("c2").bind("follow_up").bind(ts).bind(ts).execute(&pool).await;
        assert!(duplicate.is_err(), "second open conversation must violate the partial index");

        sqlx::query(insert)
            .bind("c3")
            .bind("closed_unresponsive")
            .bind(ts)
            .bind(ts)
            .execute(&pool)
            .await
            .expect("closed conversations are unconstrained");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert_eq!(count_objects(&pool, "table", MANAGED_TABLES).await, 0);

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(count_objects(&pool, "table", MANAGED_TABLES).await, MANAGED_TABLES.len());
    }
}
