use std::time::Duration;

use async_trait::async_trait;
use quotewatch_core::capabilities::NotificationDispatcher;
use quotewatch_core::errors::EscalationError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::retry::RetryPolicy;
use crate::DispatchError;

#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    target: &'a str,
    text: &'a str,
}

/// Posts `{target, text}` to a messaging gateway, retrying transient failures.
pub struct HttpGatewayDispatcher {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    retry: RetryPolicy,
}

impl HttpGatewayDispatcher {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DispatchError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|error| DispatchError::Config(format!("invalid gateway url `{url}`: {error}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DispatchError::Config(format!("failed to build http client: {error}")))?;
        Ok(Self { client, url, api_key, retry })
    }

    pub async fn post(&self, target: &str, text: &str) -> Result<(), DispatchError> {
        let mut last_error = None;
        for attempt in 0..self.retry.total_attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
            }
            match self.attempt(target, text).await {
                Ok(()) => {
                    tracing::info!(
                        event_name = "notify.delivered",
                        target,
                        attempt,
                        "notification accepted by gateway"
                    );
                    return Ok(());
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!(
                        event_name = "notify.retry",
                        target,
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %error,
                        "gateway delivery failed"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(DispatchError::Exhausted {
            attempts: self.retry.total_attempts(),
            last: last_error.map(|error| error.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(&self, target: &str, text: &str) -> Result<(), DispatchError> {
        let mut request = self.client.post(&self.url).json(&GatewayMessage { target, text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| DispatchError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl NotificationDispatcher for HttpGatewayDispatcher {
    async fn send(&self, target: &str, text: &str) -> Result<(), EscalationError> {
        self.post(target, text).await.map_err(|error| EscalationError::DispatchFailure {
            target: target.to_string(),
            message: error.to_string(),
        })
    }
}
