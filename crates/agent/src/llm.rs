use std::time::Duration;

use async_trait::async_trait;
use quotewatch_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const SYSTEM_PROMPT: &str = "You are a strict binary classifier. Reply with one word: yes or no.";
const MAX_ANSWER_TOKENS: u32 = 8;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm configuration invalid: {0}")]
    Config(String),
    #[error("llm provider rejected credentials (status {status})")]
    Auth { status: u16 },
    #[error("llm provider rate limited the request")]
    RateLimited,
    #[error("llm request timed out")]
    Timeout,
    #[error("llm network failure: {0}")]
    Network(String),
    #[error("llm provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

impl LlmError {
    /// Failures worth another attempt with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout | Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Config(_) | Self::Auth { .. } | Self::Decode(_) => false,
        }
    }

    fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth { status },
            429 => Self::RateLimited,
            408 => Self::Timeout,
            _ => Self::Status { status, body: truncate(body) },
        }
    }

    fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error.to_string())
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Chat completion over HTTP for the three supported provider dialects.
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string());
        validate_base_url(&base_url)?;

        if config.provider != LlmProvider::Ollama && config.api_key.is_none() {
            return Err(LlmError::Config(format!(
                "provider `{}` requires an api key",
                provider_label(config.provider)
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Config(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint: endpoint(config.provider, &base_url),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, body: &Value) -> Result<String, LlmError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = match self.provider {
                LlmProvider::Anthropic => request
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                LlmProvider::OpenAi | LlmProvider::Ollama => {
                    request.bearer_auth(key.expose_secret())
                }
            };
        }

        let response = request.send().await.map_err(|error| LlmError::from_transport(&error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| LlmError::from_transport(&error))?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }

        let payload: Value =
            serde_json::from_str(&text).map_err(|error| LlmError::Decode(error.to_string()))?;
        extract_answer(self.provider, &payload)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = request_body(self.provider, &self.model, prompt);
        let mut attempt = 0;
        loop {
            tracing::debug!(
                event_name = "llm.request",
                provider = provider_label(self.provider),
                model = %self.model,
                attempt,
                "calling llm provider"
            );
            match self.attempt(&body).await {
                Ok(answer) => return Ok(answer),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "llm.retry",
                        provider = provider_label(self.provider),
                        attempt,
                        error = %error,
                        "transient llm failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

pub fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

fn provider_label(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "openai",
        LlmProvider::Anthropic => "anthropic",
        LlmProvider::Ollama => "ollama",
    }
}

fn endpoint(provider: LlmProvider, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match provider {
        LlmProvider::OpenAi => format!("{base}/chat/completions"),
        LlmProvider::Anthropic => format!("{base}/v1/messages"),
        LlmProvider::Ollama => format!("{base}/api/chat"),
    }
}

/// Remote endpoints must use https; plain http is accepted only for loopback hosts.
fn validate_base_url(base_url: &str) -> Result<(), LlmError> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|error| LlmError::Config(format!("invalid base_url `{base_url}`: {error}")))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let host = parsed.host_str().unwrap_or_default();
            if matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1") {
                Ok(())
            } else {
                Err(LlmError::Config(format!(
                    "plain http is only allowed for localhost, got `{base_url}`"
                )))
            }
        }
        other => Err(LlmError::Config(format!("unsupported scheme `{other}` in `{base_url}`"))),
    }
}

fn request_body(provider: LlmProvider, model: &str, prompt: &str) -> Value {
    match provider {
        LlmProvider::OpenAi => json!({
            "model": model,
            "temperature": 0,
            "max_tokens": MAX_ANSWER_TOKENS,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        }),
        LlmProvider::Anthropic => json!({
            "model": model,
            "max_tokens": MAX_ANSWER_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": prompt }],
        }),
        LlmProvider::Ollama => json!({
            "model": model,
            "stream": false,
            "options": { "temperature": 0 },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        }),
    }
}

fn extract_answer(provider: LlmProvider, payload: &Value) -> Result<String, LlmError> {
    let answer = match provider {
        LlmProvider::OpenAi => payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        LlmProvider::Anthropic => payload.get("content").and_then(Value::as_array).map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        }),
        LlmProvider::Ollama => {
            payload.pointer("/message/content").and_then(Value::as_str).map(str::to_string)
        }
    };

    match answer {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(LlmError::Decode(format!(
            "no answer text in {} response",
            provider_label(provider)
        ))),
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    }
}
