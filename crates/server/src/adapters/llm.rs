//! Chat completion over OpenAI-compatible and Ollama endpoints.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use callhook_agent::llm::{ChatMessage, CompletionRequest, LlmClient};
use callhook_core::config::{LlmConfig, LlmProvider};

use super::is_transient;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_BASE: &str = "http://localhost:11434";
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

pub struct HttpLlmClient {
    http: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        let default_base = match config.provider {
            LlmProvider::OpenAi => OPENAI_BASE,
            LlmProvider::Ollama => OLLAMA_BASE,
        };
        let base_url = config.base_url.as_deref().unwrap_or(default_base);
        Self {
            http,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        match self.provider {
            LlmProvider::OpenAi => json!({
                "model": self.model,
                "messages": request.messages,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }),
            LlmProvider::Ollama => json!({
                "model": self.model,
                "messages": request.messages,
                "stream": false,
                "options": {
                    "num_predict": request.max_tokens,
                    "temperature": request.temperature,
                },
            }),
        }
    }

    /// `Ok(None)` means a transient failure the caller may retry.
    async fn attempt(&self, body: &Value) -> Result<Option<String>> {
        let mut builder = self.http.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) if error.is_timeout() || error.is_connect() => {
                warn!(event_name = "llm.request.transport", error = %error, "llm request failed");
                return Ok(None);
            }
            Err(error) => return Err(error).context("llm request failed"),
        };

        let status = response.status();
        if is_transient(status) {
            warn!(event_name = "llm.request.transient", status = %status, "llm returned a transient error");
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("llm returned {status}: {text}");
        }

        let content = match self.provider {
            LlmProvider::OpenAi => {
                let parsed: OpenAiResponse =
                    response.json().await.context("unreadable chat completion")?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| anyhow!("chat completion had no choices"))?
            }
            LlmProvider::Ollama => {
                let parsed: OllamaResponse =
                    response.json().await.context("unreadable ollama chat response")?;
                parsed.message.content
            }
        };
        Ok(Some(content))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.body(request);
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            if let Some(content) = self.attempt(&body).await? {
                return Ok(content);
            }
        }
        bail!("llm request failed after {} attempts", self.max_retries + 1)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use callhook_agent::llm::{ChatMessage, CompletionRequest, LlmClient};
    use callhook_core::config::{LlmConfig, LlmProvider};

    use super::HttpLlmClient;
    use crate::adapters::http_client;

    fn config(provider: LlmProvider, base_url: String) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("sk-test".to_string())),
            base_url: Some(base_url),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            max_tokens: 200,
            temperature: 0.7,
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("my ac died")],
            max_tokens: 200,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn openai_reads_the_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "test-model", "max_tokens": 200 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Sorry to hear that!" } }]
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(
            http_client(5).expect("client"),
            &config(LlmProvider::OpenAi, server.uri()),
        );
        assert_eq!(client.complete(&request()).await.expect("completion"), "Sorry to hear that!");
    }

    #[tokio::test]
    async fn ollama_retries_a_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": { "role": "assistant", "content": "What's your address?" }
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(
            http_client(5).expect("client"),
            &config(LlmProvider::Ollama, server.uri()),
        );
        assert_eq!(client.complete(&request()).await.expect("completion"), "What's your address?");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(
            http_client(5).expect("client"),
            &config(LlmProvider::OpenAi, server.uri()),
        );
        let error = client.complete(&request()).await.expect_err("unauthorised");
        assert!(error.to_string().contains("401"));
    }
}
