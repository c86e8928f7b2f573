use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use callhook_core::config::{AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str| {
        field_source(key_path, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let rows: Vec<(&str, String)> = vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.public_base_url", config.server.public_base_url.clone()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("twilio.account_sid", redact_sid(config.twilio.account_sid.as_deref())),
        ("twilio.auth_token", redact_secret(config.twilio.auth_token.as_ref())),
        ("twilio.lookup_enabled", config.twilio.lookup_enabled.to_string()),
        ("llm.provider", format!("{:?}", config.llm.provider)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("llm.max_tokens", config.llm.max_tokens.to_string()),
        ("llm.temperature", config.llm.temperature.to_string()),
        ("voice_ai.enabled", config.voice_ai.enabled.to_string()),
        ("voice_ai.api_key", redact_secret(config.voice_ai.api_key.as_ref())),
        ("email.api_key", redact_secret(config.email.api_key.as_ref())),
        ("email.from_address", config.email.from_address.clone()),
        (
            "calendar.google_client_id",
            config.calendar.google_client_id.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("calendar.google_client_secret", redact_secret(config.calendar.google_client_secret.as_ref())),
        ("follow_up.reply_window_minutes", config.follow_up.reply_window_minutes.to_string()),
        ("follow_up.delays_minutes", format!("{:?}", config.follow_up.delays_minutes)),
        (
            "follow_up.owner_nudge_delay_minutes",
            config.follow_up.owner_nudge_delay_minutes.to_string(),
        ),
        ("scheduler.poll_interval_secs", config.scheduler.poll_interval_secs.to_string()),
        ("scheduler.max_attempts", config.scheduler.max_attempts.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(rows.iter().map(|(key, value)| render_line(key, value, source(key))));
    lines.join("\n")
}

/// `server.port` reads `CALLHOOK_SERVER_PORT`.
pub fn env_key(key_path: &str) -> String {
    format!("CALLHOOK_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    ["callhook.toml", "config/callhook.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, config_file_doc: Option<&Value>, config_file_path: Option<&Path>) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path
        .split('.')
        .try_fold(root, |current, key| current.get(key))
        .is_some()
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    if secret.is_some() { "<redacted>" } else { "<unset>" }.to_string()
}

/// Keeps the `AC` prefix and last four characters of an account sid.
fn redact_sid(sid: Option<&str>) -> String {
    match sid.map(str::trim) {
        None | Some("") => "<unset>".to_string(),
        Some(sid) if sid.len() > 6 && sid.is_char_boundary(sid.len() - 4) => {
            format!("{}***{}", &sid[..2], &sid[sid.len() - 4..])
        }
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{env_key, redact_sid};

    #[test]
    fn env_key_follows_the_section_field_convention() {
        assert_eq!(env_key("server.public_base_url"), "CALLHOOK_SERVER_PUBLIC_BASE_URL");
    }

    #[test]
    fn account_sid_is_partially_redacted() {
        assert_eq!(redact_sid(Some("AC0123456789abcdef")), "AC***cdef");
        assert_eq!(redact_sid(None), "<unset>");
        assert_eq!(redact_sid(Some("AC1")), "<redacted>");
    }
}
