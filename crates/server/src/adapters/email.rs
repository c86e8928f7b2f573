use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;

use callhook_core::ports::{EmailSender, IntegrationError};

use super::{rejected, transport};

const PROVIDER: &str = "resend";
const API_BASE: &str = "https://api.resend.com";

pub struct ResendEmailSender {
    http: Client,
    api_key: SecretString,
    from_address: String,
    api_base: String,
}

impl ResendEmailSender {
    pub fn new(http: Client, api_key: SecretString, from_address: impl Into<String>) -> Self {
        Self { http, api_key, from_address: from_address.into(), api_base: API_BASE.to_string() }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), IntegrationError> {
        let response = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({
                "from": self.from_address,
                "to": [to],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyEmailSender;

#[async_trait]
impl EmailSender for LogOnlyEmailSender {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), IntegrationError> {
        info!(
            event_name = "email.log_only.sent",
            to = %to,
            subject = %subject,
            "email provider not configured; email logged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use callhook_core::ports::{EmailSender, IntegrationError};

    use super::ResendEmailSender;
    use crate::adapters::http_client;

    fn sender(base: &str) -> ResendEmailSender {
        ResendEmailSender::new(
            http_client(5).expect("client"),
            SecretString::from("re_key".to_string()),
            "CallHook <notifications@callhook.com>",
        )
        .with_api_base(base)
    }

    #[tokio::test]
    async fn email_is_sent_as_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_key"))
            .and(body_json(json!({
                "from": "CallHook <notifications@callhook.com>",
                "to": ["dana@example.com"],
                "subject": "Missed call",
                "text": "Missed call from (555) 123-4567. AI is following up now."
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "email-1" })))
            .expect(1)
            .mount(&server)
            .await;

        sender(&server.uri())
            .send_email(
                "dana@example.com",
                "Missed call",
                "Missed call from (555) 123-4567. AI is following up now.",
            )
            .await
            .expect("sent");
    }

    #[tokio::test]
    async fn provider_errors_surface_as_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let error = sender(&server.uri())
            .send_email("dana@example.com", "s", "b")
            .await
            .expect_err("rejected");
        assert!(matches!(error, IntegrationError::Rejected { status: 422, .. }));
    }
}
