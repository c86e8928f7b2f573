use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use callhook_core::config::VoiceAiConfig;
use callhook_core::ports::{IntegrationError, VoiceAgent, VoiceTransfer};

use super::{decode, rejected, transport};

const PROVIDER: &str = "vapi";

/// Metadata keys the voice provider echoes back on every webhook for the call.
pub const CALL_ID_METADATA: &str = "callhook_call_id";
pub const BUSINESS_ID_METADATA: &str = "business_id";

#[derive(Deserialize)]
struct CallResource {
    id: String,
}

/// Hands a missed caller to the voice assistant by having it call them back.
pub struct VapiVoiceAgent {
    http: Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl VapiVoiceAgent {
    pub fn new(http: Client, config: &VoiceAiConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VoiceAgent for VapiVoiceAgent {
    async fn place_or_transfer_call(&self, transfer: &VoiceTransfer) -> Result<String, IntegrationError> {
        let Some(api_key) = &self.api_key else {
            return Err(IntegrationError::NotConfigured { provider: PROVIDER });
        };
        let payload = json!({
            "assistantId": transfer.assistant_id,
            "customer": { "number": transfer.caller_phone },
            "assistantOverrides": { "firstMessage": transfer.first_message },
            "metadata": {
                CALL_ID_METADATA: transfer.call_id,
                BUSINESS_ID_METADATA: transfer.business_id,
            },
        });

        let response = self
            .http
            .post(format!("{}/call/phone", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport(PROVIDER, error))?;
        if !response.status().is_success() {
            return Err(rejected(PROVIDER, response).await);
        }
        let call: CallResource = response.json().await.map_err(|error| decode(PROVIDER, error))?;
        Ok(call.id)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use callhook_core::config::VoiceAiConfig;
    use callhook_core::ports::{IntegrationError, VoiceAgent, VoiceTransfer};

    use super::VapiVoiceAgent;
    use crate::adapters::http_client;

    fn transfer() -> VoiceTransfer {
        VoiceTransfer {
            assistant_id: "assistant-1".to_string(),
            caller_phone: "+15551234567".to_string(),
            business_id: "biz-1".to_string(),
            call_id: "call-1".to_string(),
            first_message: "Hey! Sorry we missed your call.".to_string(),
        }
    }

    #[tokio::test]
    async fn transfer_carries_assistant_and_call_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call/phone"))
            .and(header("authorization", "Bearer vapi-key"))
            .and(body_partial_json(json!({
                "assistantId": "assistant-1",
                "customer": { "number": "+15551234567" },
                "metadata": { "callhook_call_id": "call-1", "business_id": "biz-1" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "vapi-call-9" })))
            .expect(1)
            .mount(&server)
            .await;

        let agent = VapiVoiceAgent::new(
            http_client(5).expect("client"),
            &VoiceAiConfig {
                enabled: true,
                api_key: Some(SecretString::from("vapi-key".to_string())),
                base_url: server.uri(),
            },
        );
        assert_eq!(agent.place_or_transfer_call(&transfer()).await.expect("placed"), "vapi-call-9");
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let agent = VapiVoiceAgent::new(
            http_client(5).expect("client"),
            &VoiceAiConfig { enabled: true, api_key: None, base_url: "http://unused".to_string() },
        );
        assert_eq!(
            agent.place_or_transfer_call(&transfer()).await,
            Err(IntegrationError::NotConfigured { provider: "vapi" })
        );
    }
}
