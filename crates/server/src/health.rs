//! `GET /health`: database reachability plus the delayed-action backlog.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use callhook_core::domain::scheduled::ActionState;
use callhook_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    /// Informational; a backlog never marks the service degraded.
    pub scheduler: HealthCheck,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let scheduler = if ready {
        backlog_check(&state.db_pool).await
    } else {
        HealthCheck::degraded("skipped because the database is unreachable")
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        scheduler,
        checked_at: Utc::now(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => {
            warn!(event_name = "system.health.database_degraded", error = %error, "health check query failed");
            HealthCheck::degraded(format!("database query failed: {error}"))
        }
    }
}

async fn backlog_check(pool: &DbPool) -> HealthCheck {
    let counted = sqlx::query_as::<_, (i64, i64)>(
        "SELECT
             COALESCE(SUM(CASE WHEN state = ? THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN state = ? THEN 1 ELSE 0 END), 0)
         FROM scheduled_action",
    )
    .bind(ActionState::Pending.as_str())
    .bind(ActionState::Failed.as_str())
    .fetch_one(pool)
    .await;

    match counted {
        Ok((pending, failed)) => {
            HealthCheck::ready(format!("{pending} pending, {failed} failed delayed actions"))
        }
        Err(error) => HealthCheck::degraded(format!("scheduled action query failed: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::{extract::State, Json};
    use callhook_db::{connect_with_settings, migrations};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    #[tokio::test]
    async fn health_reports_ready_with_scheduler_backlog() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let response = router(pool.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["scheduler"]["detail"], "0 pending, 0 failed delayed actions");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.scheduler.status, "degraded");
    }
}
