//! Outbound notification delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quotewatch_core::capabilities::NotificationDispatcher;
use quotewatch_core::config::NotifyConfig;
use quotewatch_core::errors::EscalationError;
use thiserror::Error;

pub mod gateway;
pub mod retry;

pub use gateway::HttpGatewayDispatcher;
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("gateway configuration invalid: {0}")]
    Config(String),
    #[error("gateway transport failed: {0}")]
    Transport(String),
    #[error("gateway rejected notification with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) | Self::Exhausted { .. } => false,
        }
    }
}

/// Used when no gateway is configured: every notification is written to the log and reported
/// as delivered.
#[derive(Clone, Debug, Default)]
pub struct LogOnlyDispatcher;

#[async_trait]
impl NotificationDispatcher for LogOnlyDispatcher {
    async fn send(&self, target: &str, text: &str) -> Result<(), EscalationError> {
        tracing::info!(
            event_name = "notify.log_only",
            target,
            text,
            "notification gateway not configured; message logged only"
        );
        Ok(())
    }
}

pub fn dispatcher_from_config(
    config: &NotifyConfig,
) -> Result<Arc<dyn NotificationDispatcher>, DispatchError> {
    match &config.gateway_url {
        Some(url) => {
            let dispatcher = HttpGatewayDispatcher::new(
                url.clone(),
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
                RetryPolicy::with_max_retries(config.max_retries),
            )?;
            Ok(Arc::new(dispatcher))
        }
        None => Ok(Arc::new(LogOnlyDispatcher)),
    }
}

#[cfg(test)]
mod tests {
    use quotewatch_core::capabilities::NotificationDispatcher;
    use quotewatch_core::config::NotifyConfig;

    use super::{dispatcher_from_config, DispatchError, LogOnlyDispatcher};

    #[tokio::test]
    async fn log_only_dispatcher_always_succeeds() {
        assert!(LogOnlyDispatcher.send("manager-group", "alerta").await.is_ok());
    }

    #[test]
    fn dispatcher_selection_follows_gateway_url() {
        let mut config =
            NotifyConfig { gateway_url: None, api_key: None, timeout_secs: 10, max_retries: 3 };
        assert!(dispatcher_from_config(&config).is_ok());

        config.gateway_url = Some("::bad::".to_string());
        assert!(matches!(dispatcher_from_config(&config), Err(DispatchError::Config(_))));
    }

    #[test]
    fn only_throttling_server_and_transport_failures_retry() {
        assert!(DispatchError::Transport("reset".to_string()).is_retryable());
        assert!(DispatchError::Rejected { status: 429, body: String::new() }.is_retryable());
        assert!(DispatchError::Rejected { status: 500, body: String::new() }.is_retryable());
        assert!(!DispatchError::Rejected { status: 404, body: String::new() }.is_retryable());
    }
}
