use std::sync::Arc;

use callhook_agent::extraction::{HeuristicExtractor, LlmExtractor};
use callhook_agent::llm::{LlmClient, LlmReplyGenerator};
use callhook_agent::{ConversationRuntime, RuntimePorts, RuntimeSettings, SchedulerWorker};
use callhook_core::clock::{Clock, SystemClock};
use callhook_core::config::{AppConfig, ConfigError, LoadOptions};
use callhook_core::ports::{CalendarProvider, EmailSender, SmsSender};
use callhook_db::{connect_with_settings, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

use crate::adapters::calendar::GoogleCalendar;
use crate::adapters::email::{LogOnlyEmailSender, ResendEmailSender};
use crate::adapters::http_client;
use crate::adapters::llm::HttpLlmClient;
use crate::adapters::twilio::{
    LogOnlySmsSender, TwilioCredentials, TwilioLineTypeLookup, TwilioSmsSender,
};
use crate::adapters::vapi::VapiVoiceAgent;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub repos: Repositories,
    pub runtime: Arc<ConversationRuntime>,
    clock: Arc<dyn Clock>,
}

impl Application {
    pub fn scheduler_worker(&self) -> SchedulerWorker {
        SchedulerWorker::new(
            self.repos.actions.clone(),
            self.runtime.clone(),
            &self.config.scheduler,
            self.clock.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("extraction patterns failed to compile: {0}")]
    Extractor(#[source] regex::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let ports = build_ports(&config)?;
    let repos = Repositories::sqlite(db_pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runtime = Arc::new(ConversationRuntime::new(
        repos.clone(),
        ports,
        RuntimeSettings::from_config(&config),
        clock.clone(),
    ));

    Ok(Application { config, db_pool, repos, runtime, clock })
}

/// Real provider adapters where credentials exist, log-only stand-ins otherwise.
fn build_ports(config: &AppConfig) -> Result<RuntimePorts, BootstrapError> {
    let http = http_client(config.llm.timeout_secs).map_err(BootstrapError::Http)?;
    let status_callback = format!(
        "{}/webhook/sms/status",
        config.server.public_base_url.trim_end_matches('/')
    );

    let credentials = TwilioCredentials::from_config(&config.twilio);
    let sms: Arc<dyn SmsSender> = match credentials.clone() {
        Some(credentials) => {
            Arc::new(TwilioSmsSender::new(http.clone(), credentials, Some(status_callback)))
        }
        None => Arc::new(LogOnlySmsSender),
    };
    let lookup_credentials = if config.twilio.lookup_enabled { credentials } else { None };
    let lookup = Arc::new(TwilioLineTypeLookup::new(http.clone(), lookup_credentials));

    let email: Arc<dyn EmailSender> = match config.email.api_key.clone() {
        Some(api_key) => Arc::new(ResendEmailSender::new(
            http.clone(),
            api_key,
            config.email.from_address.clone(),
        )),
        None => Arc::new(LogOnlyEmailSender),
    };

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(http.clone(), &config.llm));
    let fallback = HeuristicExtractor::new().map_err(BootstrapError::Extractor)?;
    let calendar = GoogleCalendar::from_config(http.clone(), &config.calendar)
        .map(|calendar| Arc::new(calendar) as Arc<dyn CalendarProvider>);

    info!(
        event_name = "system.bootstrap.ports",
        twilio = config.twilio.is_configured(),
        email = config.email.api_key.is_some(),
        voice_ai = config.voice_ai.enabled,
        calendar = calendar.is_some(),
        llm_provider = ?config.llm.provider,
        "provider adapters selected"
    );

    Ok(RuntimePorts {
        sms,
        email,
        lookup,
        voice: Arc::new(VapiVoiceAgent::new(http, &config.voice_ai)),
        replies: Arc::new(LlmReplyGenerator::new(
            llm.clone(),
            config.llm.max_tokens,
            config.llm.temperature,
        )),
        extractor: Arc::new(LlmExtractor::new(llm, fallback)),
        calendar,
    })
}
