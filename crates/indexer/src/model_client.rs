//! OpenAI-compatible chat completion client.

use crate::limits::acquire_model_permit;
use async_trait::async_trait;
use repograph_chunker::{ChunkerError, ModelClient};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MODEL_URL_ENV: &str = "REPOGRAPH_MODEL_URL";
pub const MODEL_NAME_ENV: &str = "REPOGRAPH_MODEL";
pub const API_KEY_ENV: &str = "REPOGRAPH_API_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Endpoint settings for [`HttpModelClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL (`https://host/v1`) or a full `/chat/completions` URL
    pub url: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ModelConfig {
    /// Build from raw variable values; `None` unless both url and model are set.
    #[must_use]
    pub fn from_vars(url: Option<String>, model: Option<String>, api_key: Option<String>) -> Option<Self> {
        let non_empty = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Some(Self {
            url: non_empty(url)?,
            model: non_empty(model)?,
            api_key: non_empty(api_key),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Read `REPOGRAPH_MODEL_URL`, `REPOGRAPH_MODEL` and `REPOGRAPH_API_KEY`
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_vars(
            std::env::var(MODEL_URL_ENV).ok(),
            std::env::var(MODEL_NAME_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        )
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status.as_u16() == 429
}

enum Attempt {
    Done(String),
    Retry(String),
    Fail(String),
}

/// [`ModelClient`] over an OpenAI-compatible `/chat/completions` endpoint.
///
/// Every call holds a slot of the process-wide model semaphore. Transport
/// errors, 429 and 5xx responses are retried with exponential backoff.
pub struct HttpModelClient {
    client: Client,
    config: ModelConfig,
    endpoint: String,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> repograph_chunker::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ChunkerError::model(format!("failed to build HTTP client: {e}")))?;
        let endpoint = config.endpoint();
        log::info!("Model endpoint {endpoint} ({})", config.model);
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Client from the environment, `None` when no endpoint is configured
    pub fn from_env() -> repograph_chunker::Result<Option<Self>> {
        ModelConfig::from_env().map(Self::new).transpose()
    }

    async fn attempt(&self, request: &ChatRequest<'_>) -> Attempt {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return Attempt::Retry(format!("request failed: {err}")),
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
            return if is_retryable(status) {
                Attempt::Retry(message)
            } else {
                Attempt::Fail(message)
            };
        }
        match response.json::<ChatResponse>().await {
            Ok(parsed) => match first_content(parsed) {
                Some(content) => Attempt::Done(content),
                None => Attempt::Fail("response has no message content".to_string()),
            },
            Err(err) => Attempt::Fail(format!("invalid response body: {err}")),
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> repograph_chunker::Result<String> {
        let _permit = acquire_model_permit()
            .await
            .map_err(|e| ChunkerError::model(e.to_string()))?;
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS << (attempt - 1).min(6);
                log::debug!("Retrying model call in {delay}ms ({last_error})");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            match self.attempt(&request).await {
                Attempt::Done(content) => return Ok(content),
                Attempt::Retry(message) => last_error = message,
                Attempt::Fail(message) => return Err(ChunkerError::model(message)),
            }
        }
        log::warn!(
            "Model call exhausted {} retries: {last_error}",
            self.config.max_retries
        );
        Err(ChunkerError::model(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_requires_url_and_model() {
        assert!(ModelConfig::from_vars(None, Some("m".into()), None).is_none());
        assert!(ModelConfig::from_vars(Some("  ".into()), Some("m".into()), None).is_none());
        let config =
            ModelConfig::from_vars(Some("http://localhost:8080/v1/".into()), Some("m".into()), Some(String::new()))
                .unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn endpoint_keeps_full_url() {
        let config = ModelConfig::from_vars(
            Some("http://h/v1/chat/completions".into()),
            Some("m".into()),
            None,
        )
        .unwrap();
        assert_eq!(config.endpoint(), "http://h/v1/chat/completions");
    }

    #[test]
    fn first_choice_content_is_used() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hello"}},{"message":{"content":"x"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(parsed).as_deref(), Some("hello"));
        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(first_content(empty), None);
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }
}
