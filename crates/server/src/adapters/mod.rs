//! reqwest implementations of the outbound ports.
//!
//! Providers without credentials get a log-only stand-in so a development
//! server runs end to end without any accounts.

pub mod calendar;
pub mod email;
pub mod llm;
pub mod twilio;
pub mod vapi;

use std::time::Duration;

use reqwest::{Client, Response};

use callhook_core::ports::IntegrationError;

pub fn http_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("callhook/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub(crate) fn transport(provider: &'static str, error: reqwest::Error) -> IntegrationError {
    IntegrationError::Transport { provider, message: error.to_string() }
}

pub(crate) fn decode(provider: &'static str, error: impl ToString) -> IntegrationError {
    IntegrationError::Decode { provider, message: error.to_string() }
}

/// Turns a non-success response into `Rejected`, keeping the body for the log line.
pub(crate) async fn rejected(provider: &'static str, response: Response) -> IntegrationError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    IntegrationError::Rejected { provider, status, message }
}

/// 429 and 5xx are worth another attempt; everything else is final.
pub(crate) fn is_transient(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
