use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduling::FOLLOW_UP_SEQUENCE_LEN;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub twilio: TwilioConfig,
    pub llm: LlmConfig,
    pub voice_ai: VoiceAiConfig,
    pub email: EmailConfig,
    pub calendar: CalendarConfig,
    pub follow_up: FollowUpConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Externally reachable origin used to build provider callback URLs.
    pub public_base_url: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub lookup_enabled: bool,
}

impl TwilioConfig {
    pub fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct VoiceAiConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub api_key: Option<SecretString>,
    pub from_address: String,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub calendar_id: String,
}

/// Timings for the automated outreach sequences, all in minutes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowUpConfig {
    pub reply_window_minutes: u32,
    pub delays_minutes: Vec<u32>,
    pub owner_nudge_delay_minutes: u32,
    pub review_request_delay_minutes: u32,
    pub review_reminder_delay_minutes: u32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            reply_window_minutes: 120,
            delays_minutes: vec![1440, 4320, 4320],
            owner_nudge_delay_minutes: 30,
            review_request_delay_minutes: 120,
            review_reminder_delay_minutes: 2880,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: u32,
    pub claim_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            batch_size: 25,
            claim_timeout_secs: 300,
            max_attempts: 5,
            retry_base_delay_secs: 30,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub voice_ai_enabled: Option<bool>,
    pub twilio_lookup_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Environment keys read by [`AppConfig::load`], in the order they are applied.
pub const ENV_KEYS: &[&str] = &[
    "CALLHOOK_DATABASE_URL",
    "CALLHOOK_DATABASE_MAX_CONNECTIONS",
    "CALLHOOK_DATABASE_TIMEOUT_SECS",
    "CALLHOOK_SERVER_BIND_ADDRESS",
    "CALLHOOK_SERVER_PORT",
    "CALLHOOK_SERVER_PUBLIC_BASE_URL",
    "CALLHOOK_SERVER_GRACEFUL_SHUTDOWN_SECS",
    "CALLHOOK_TWILIO_ACCOUNT_SID",
    "CALLHOOK_TWILIO_AUTH_TOKEN",
    "CALLHOOK_TWILIO_LOOKUP_ENABLED",
    "CALLHOOK_LLM_PROVIDER",
    "CALLHOOK_LLM_API_KEY",
    "CALLHOOK_LLM_BASE_URL",
    "CALLHOOK_LLM_MODEL",
    "CALLHOOK_LLM_TIMEOUT_SECS",
    "CALLHOOK_LLM_MAX_RETRIES",
    "CALLHOOK_LLM_MAX_TOKENS",
    "CALLHOOK_LLM_TEMPERATURE",
    "CALLHOOK_VOICE_AI_ENABLED",
    "CALLHOOK_VOICE_AI_API_KEY",
    "CALLHOOK_VOICE_AI_BASE_URL",
    "CALLHOOK_EMAIL_API_KEY",
    "CALLHOOK_EMAIL_FROM_ADDRESS",
    "CALLHOOK_CALENDAR_GOOGLE_CLIENT_ID",
    "CALLHOOK_CALENDAR_GOOGLE_CLIENT_SECRET",
    "CALLHOOK_CALENDAR_ID",
    "CALLHOOK_FOLLOW_UP_REPLY_WINDOW_MINUTES",
    "CALLHOOK_FOLLOW_UP_DELAYS_MINUTES",
    "CALLHOOK_FOLLOW_UP_OWNER_NUDGE_DELAY_MINUTES",
    "CALLHOOK_FOLLOW_UP_REVIEW_REQUEST_DELAY_MINUTES",
    "CALLHOOK_FOLLOW_UP_REVIEW_REMINDER_DELAY_MINUTES",
    "CALLHOOK_SCHEDULER_POLL_INTERVAL_SECS",
    "CALLHOOK_SCHEDULER_BATCH_SIZE",
    "CALLHOOK_SCHEDULER_CLAIM_TIMEOUT_SECS",
    "CALLHOOK_SCHEDULER_MAX_ATTEMPTS",
    "CALLHOOK_SCHEDULER_RETRY_BASE_DELAY_SECS",
    "CALLHOOK_LOGGING_LEVEL",
    "CALLHOOK_LOG_LEVEL",
    "CALLHOOK_LOGGING_FORMAT",
    "CALLHOOK_LOG_FORMAT",
];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://callhook.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                public_base_url: "http://localhost:8080".to_string(),
                graceful_shutdown_secs: 15,
            },
            twilio: TwilioConfig { account_sid: None, auth_token: None, lookup_enabled: true },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                max_tokens: 200,
                temperature: 0.7,
            },
            voice_ai: VoiceAiConfig {
                enabled: false,
                api_key: None,
                base_url: "https://api.vapi.ai".to_string(),
            },
            email: EmailConfig {
                api_key: None,
                from_address: "CallHook <notifications@callhook.com>".to_string(),
            },
            calendar: CalendarConfig {
                google_client_id: None,
                google_client_secret: None,
                calendar_id: "primary".to_string(),
            },
            follow_up: FollowUpConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("callhook.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.port, server.port);
            set(&mut self.server.public_base_url, server.public_base_url);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(twilio) = patch.twilio {
            if let Some(account_sid) = twilio.account_sid {
                self.twilio.account_sid = non_empty(account_sid);
            }
            if let Some(auth_token) = twilio.auth_token {
                self.twilio.auth_token = non_empty(auth_token).map(secret_value);
            }
            set(&mut self.twilio.lookup_enabled, twilio.lookup_enabled);
        }

        if let Some(llm) = patch.llm {
            set(&mut self.llm.provider, llm.provider);
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = non_empty(api_key).map(secret_value);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            set(&mut self.llm.model, llm.model);
            set(&mut self.llm.timeout_secs, llm.timeout_secs);
            set(&mut self.llm.max_retries, llm.max_retries);
            set(&mut self.llm.max_tokens, llm.max_tokens);
            set(&mut self.llm.temperature, llm.temperature);
        }

        if let Some(voice_ai) = patch.voice_ai {
            set(&mut self.voice_ai.enabled, voice_ai.enabled);
            if let Some(api_key) = voice_ai.api_key {
                self.voice_ai.api_key = non_empty(api_key).map(secret_value);
            }
            set(&mut self.voice_ai.base_url, voice_ai.base_url);
        }

        if let Some(email) = patch.email {
            if let Some(api_key) = email.api_key {
                self.email.api_key = non_empty(api_key).map(secret_value);
            }
            set(&mut self.email.from_address, email.from_address);
        }

        if let Some(calendar) = patch.calendar {
            if let Some(client_id) = calendar.google_client_id {
                self.calendar.google_client_id = non_empty(client_id);
            }
            if let Some(client_secret) = calendar.google_client_secret {
                self.calendar.google_client_secret = non_empty(client_secret).map(secret_value);
            }
            set(&mut self.calendar.calendar_id, calendar.calendar_id);
        }

        if let Some(follow_up) = patch.follow_up {
            set(&mut self.follow_up.reply_window_minutes, follow_up.reply_window_minutes);
            set(&mut self.follow_up.delays_minutes, follow_up.delays_minutes);
            set(&mut self.follow_up.owner_nudge_delay_minutes, follow_up.owner_nudge_delay_minutes);
            set(
                &mut self.follow_up.review_request_delay_minutes,
                follow_up.review_request_delay_minutes,
            );
            set(
                &mut self.follow_up.review_reminder_delay_minutes,
                follow_up.review_reminder_delay_minutes,
            );
        }

        if let Some(scheduler) = patch.scheduler {
            set(&mut self.scheduler.poll_interval_secs, scheduler.poll_interval_secs);
            set(&mut self.scheduler.batch_size, scheduler.batch_size);
            set(&mut self.scheduler.claim_timeout_secs, scheduler.claim_timeout_secs);
            set(&mut self.scheduler.max_attempts, scheduler.max_attempts);
            set(&mut self.scheduler.retry_base_delay_secs, scheduler.retry_base_delay_secs);
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CALLHOOK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CALLHOOK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CALLHOOK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CALLHOOK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLHOOK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CALLHOOK_SERVER_PORT") {
            self.server.port = parse_u16("CALLHOOK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = value;
        }
        if let Some(value) = read_env("CALLHOOK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CALLHOOK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLHOOK_TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(value);
        }
        if let Some(value) = read_env("CALLHOOK_TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLHOOK_TWILIO_LOOKUP_ENABLED") {
            self.twilio.lookup_enabled = parse_bool("CALLHOOK_TWILIO_LOOKUP_ENABLED", &value)?;
        }

        if let Some(value) = read_env("CALLHOOK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CALLHOOK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLHOOK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CALLHOOK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CALLHOOK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CALLHOOK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CALLHOOK_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("CALLHOOK_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("CALLHOOK_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("CALLHOOK_VOICE_AI_ENABLED") {
            self.voice_ai.enabled = parse_bool("CALLHOOK_VOICE_AI_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_VOICE_AI_API_KEY") {
            self.voice_ai.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLHOOK_VOICE_AI_BASE_URL") {
            self.voice_ai.base_url = value;
        }

        if let Some(value) = read_env("CALLHOOK_EMAIL_API_KEY") {
            self.email.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLHOOK_EMAIL_FROM_ADDRESS") {
            self.email.from_address = value;
        }

        if let Some(value) = read_env("CALLHOOK_CALENDAR_GOOGLE_CLIENT_ID") {
            self.calendar.google_client_id = Some(value);
        }
        if let Some(value) = read_env("CALLHOOK_CALENDAR_GOOGLE_CLIENT_SECRET") {
            self.calendar.google_client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLHOOK_CALENDAR_ID") {
            self.calendar.calendar_id = value;
        }

        if let Some(value) = read_env("CALLHOOK_FOLLOW_UP_REPLY_WINDOW_MINUTES") {
            self.follow_up.reply_window_minutes =
                parse_u32("CALLHOOK_FOLLOW_UP_REPLY_WINDOW_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_FOLLOW_UP_DELAYS_MINUTES") {
            self.follow_up.delays_minutes =
                parse_u32_list("CALLHOOK_FOLLOW_UP_DELAYS_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_FOLLOW_UP_OWNER_NUDGE_DELAY_MINUTES") {
            self.follow_up.owner_nudge_delay_minutes =
                parse_u32("CALLHOOK_FOLLOW_UP_OWNER_NUDGE_DELAY_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_FOLLOW_UP_REVIEW_REQUEST_DELAY_MINUTES") {
            self.follow_up.review_request_delay_minutes =
                parse_u32("CALLHOOK_FOLLOW_UP_REVIEW_REQUEST_DELAY_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_FOLLOW_UP_REVIEW_REMINDER_DELAY_MINUTES") {
            self.follow_up.review_reminder_delay_minutes =
                parse_u32("CALLHOOK_FOLLOW_UP_REVIEW_REMINDER_DELAY_MINUTES", &value)?;
        }

        if let Some(value) = read_env("CALLHOOK_SCHEDULER_POLL_INTERVAL_SECS") {
            self.scheduler.poll_interval_secs =
                parse_u64("CALLHOOK_SCHEDULER_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_SCHEDULER_BATCH_SIZE") {
            self.scheduler.batch_size = parse_u32("CALLHOOK_SCHEDULER_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_SCHEDULER_CLAIM_TIMEOUT_SECS") {
            self.scheduler.claim_timeout_secs =
                parse_u64("CALLHOOK_SCHEDULER_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_SCHEDULER_MAX_ATTEMPTS") {
            self.scheduler.max_attempts = parse_u32("CALLHOOK_SCHEDULER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("CALLHOOK_SCHEDULER_RETRY_BASE_DELAY_SECS") {
            self.scheduler.retry_base_delay_secs =
                parse_u64("CALLHOOK_SCHEDULER_RETRY_BASE_DELAY_SECS", &value)?;
        }

        let log_level =
            read_env("CALLHOOK_LOGGING_LEVEL").or_else(|| read_env("CALLHOOK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CALLHOOK_LOGGING_FORMAT").or_else(|| read_env("CALLHOOK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.server.port, overrides.server_port);
        set(&mut self.llm.provider, overrides.llm_provider);
        set(&mut self.llm.model, overrides.llm_model);
        set(&mut self.voice_ai.enabled, overrides.voice_ai_enabled);
        set(&mut self.twilio.lookup_enabled, overrides.twilio_lookup_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_twilio(&self.twilio)?;
        validate_llm(&self.llm)?;
        validate_voice_ai(&self.voice_ai)?;
        validate_follow_up(&self.follow_up)?;
        validate_scheduler(&self.scheduler)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("callhook.toml"), PathBuf::from("config/callhook.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    let base = server.public_base_url.trim();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(ConfigError::Validation(
            "server.public_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_twilio(twilio: &TwilioConfig) -> Result<(), ConfigError> {
    let Some(account_sid) = twilio.account_sid.as_deref() else {
        return Ok(());
    };

    if !account_sid.starts_with("AC") {
        let hint = if account_sid.starts_with("SK") {
            " (hint: this looks like an API key SID, not the account SID)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "twilio.account_sid must start with `AC`{hint}. Find it on the Twilio console dashboard"
        )));
    }

    let missing_token = twilio
        .auth_token
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_token {
        return Err(ConfigError::Validation(
            "twilio.auth_token is required when twilio.account_sid is set".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_voice_ai(voice_ai: &VoiceAiConfig) -> Result<(), ConfigError> {
    if !voice_ai.enabled {
        return Ok(());
    }

    let missing = voice_ai
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(
            "voice_ai.api_key is required when voice_ai.enabled is true".to_string(),
        ));
    }

    Ok(())
}

fn validate_follow_up(follow_up: &FollowUpConfig) -> Result<(), ConfigError> {
    if follow_up.reply_window_minutes == 0 {
        return Err(ConfigError::Validation(
            "follow_up.reply_window_minutes must be greater than zero".to_string(),
        ));
    }

    if follow_up.delays_minutes.len() != FOLLOW_UP_SEQUENCE_LEN {
        return Err(ConfigError::Validation(format!(
            "follow_up.delays_minutes must list exactly {FOLLOW_UP_SEQUENCE_LEN} delays, one per follow-up message (got {})",
            follow_up.delays_minutes.len()
        )));
    }

    if follow_up.delays_minutes.contains(&0) {
        return Err(ConfigError::Validation(
            "follow_up.delays_minutes entries must be greater than zero".to_string(),
        ));
    }

    if follow_up.review_reminder_delay_minutes <= follow_up.review_request_delay_minutes {
        return Err(ConfigError::Validation(
            "follow_up.review_reminder_delay_minutes must be later than review_request_delay_minutes"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if scheduler.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    if scheduler.batch_size == 0 {
        return Err(ConfigError::Validation(
            "scheduler.batch_size must be greater than zero".to_string(),
        ));
    }
    if scheduler.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "scheduler.max_attempts must be greater than zero".to_string(),
        ));
    }
    if scheduler.claim_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.claim_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.trim().parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid(key, value))
}

/// Comma separated, e.g. `1440,4320,4320`.
fn parse_u32_list(key: &str, value: &str) -> Result<Vec<u32>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u32>().map_err(|_| invalid(key, value)))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    twilio: Option<TwilioPatch>,
    llm: Option<LlmPatch>,
    voice_ai: Option<VoiceAiPatch>,
    email: Option<EmailPatch>,
    calendar: Option<CalendarPatch>,
    follow_up: Option<FollowUpPatch>,
    scheduler: Option<SchedulerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioPatch {
    account_sid: Option<String>,
    auth_token: Option<String>,
    lookup_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceAiPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    api_key: Option<String>,
    from_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    google_client_id: Option<String>,
    google_client_secret: Option<String>,
    calendar_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FollowUpPatch {
    reply_window_minutes: Option<u32>,
    delays_minutes: Option<Vec<u32>>,
    owner_nudge_delay_minutes: Option<u32>,
    review_request_delay_minutes: Option<u32>,
    review_reminder_delay_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    poll_interval_secs: Option<u64>,
    batch_size: Option<u32>,
    claim_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
