use std::env;
use std::sync::{Mutex, OnceLock};

use callhook_cli::commands::{actions, config, doctor, migrate};
use callhook_core::config::ENV_KEYS;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CALLHOOK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(
        &[("CALLHOOK_DATABASE_URL", "sqlite::memory:"), ("CALLHOOK_SERVER_PORT", "0")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn actions_lists_an_empty_table_on_a_fresh_database() {
    with_env(&[("CALLHOOK_DATABASE_URL", "sqlite::memory:")], || {
        let result = actions::run("pending", 10);
        assert_eq!(result.exit_code, 0, "expected listing to succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "actions");
        assert_eq!(payload["filter"], "pending");
        assert_eq!(payload["count"], 0);
        assert_eq!(payload["actions"], Value::Array(Vec::new()));
    });
}

#[test]
fn actions_rejects_an_unknown_state() {
    with_env(&[("CALLHOOK_DATABASE_URL", "sqlite::memory:")], || {
        let result = actions::run("snoozed", 10);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn doctor_reports_log_only_providers_as_warnings() {
    with_env(&[("CALLHOOK_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "warn");
        let twilio = payload["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "twilio"))
            .expect("twilio check");
        assert_eq!(twilio["status"], "warn");
    });
}

#[test]
fn doctor_fails_when_config_is_invalid() {
    with_env(
        &[("CALLHOOK_DATABASE_URL", "sqlite::memory:"), ("CALLHOOK_VOICE_AI_ENABLED", "true")],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1);
            assert!(result.output.contains("- [fail] config_validation"));
            assert!(result.output.contains("- [skip] database_connectivity"));
        },
    );
}

#[test]
fn config_attributes_env_values_and_redacts_secrets() {
    with_env(
        &[
            ("CALLHOOK_DATABASE_URL", "sqlite::memory:"),
            ("CALLHOOK_TWILIO_ACCOUNT_SID", "AC0123456789abcdef"),
            ("CALLHOOK_TWILIO_AUTH_TOKEN", "super-secret"),
        ],
        || {
            let output = config::run();
            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (CALLHOOK_DATABASE_URL))"
            ));
            assert!(output.contains("- twilio.account_sid = AC***cdef"));
            assert!(output.contains("- twilio.auth_token = <redacted>"));
            assert!(!output.contains("super-secret"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let previous_values: Vec<(&str, Option<String>)> =
        ENV_KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in ENV_KEYS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
