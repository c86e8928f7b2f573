//! Read-only view of the delayed action table.

use chrono::{DateTime, Utc};
use serde::Serialize;

use callhook_core::domain::scheduled::{ActionState, ScheduledAction};
use callhook_db::{connect_with_settings, migrations, Repositories};

use crate::commands::{current_thread_runtime, load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ActionRow {
    id: String,
    kind: &'static str,
    subject_id: String,
    state: &'static str,
    fire_at: DateTime<Utc>,
    attempts: u32,
    last_error: Option<String>,
}

impl From<ScheduledAction> for ActionRow {
    fn from(action: ScheduledAction) -> Self {
        Self {
            id: action.id.to_string(),
            kind: action.kind.as_str(),
            subject_id: action.subject_id,
            state: action.state.as_str(),
            fire_at: action.fire_at,
            attempts: action.attempts,
            last_error: action.last_error,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActionListing {
    command: &'static str,
    status: &'static str,
    filter: String,
    count: usize,
    actions: Vec<ActionRow>,
}

/// `all` disables the state filter.
pub fn parse_state_filter(raw: &str) -> Result<Option<ActionState>, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized == "all" {
        return Ok(None);
    }
    ActionState::parse(&normalized)
        .map(Some)
        .ok_or_else(|| format!("unknown action state `{raw}`"))
}

pub fn run(state: &str, limit: u32) -> CommandResult {
    let filter = match parse_state_filter(state) {
        Ok(filter) => filter,
        Err(message) => return CommandResult::failure("actions", "invalid_argument", message, 2),
    };
    let config = match load_config("actions") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("actions") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        // A fresh database has no table yet; migrating keeps the listing uniform.
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let actions = Repositories::sqlite(pool.clone())
            .actions
            .list(filter, limit.max(1))
            .await
            .map_err(|error| ("query", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<Vec<ScheduledAction>, (&'static str, String, u8)>(actions)
    });

    match result {
        Ok(actions) => {
            let rows: Vec<ActionRow> = actions.into_iter().map(ActionRow::from).collect();
            let listing = ActionListing {
                command: "actions",
                status: "ok",
                filter: filter.map_or("all", |state| state.as_str()).to_string(),
                count: rows.len(),
                actions: rows,
            };
            match serde_json::to_string_pretty(&listing) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => {
                    CommandResult::failure("actions", "serialization", error.to_string(), 7)
                }
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("actions", error_class, message, exit_code)
        }
    }
}
