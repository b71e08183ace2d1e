use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::NotificationDispatcher;
use crate::domain::conversation::ConversationId;
use crate::errors::EscalationError;

/// Wraps the dispatcher with the configured timeout. Failures are logged here and returned
/// so callers can note them; nothing retries at this layer.
#[derive(Clone)]
pub struct Delivery {
    dispatcher: Arc<dyn NotificationDispatcher>,
    timeout: Duration,
}

impl Delivery {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, timeout: Duration) -> Self {
        Self { dispatcher, timeout }
    }

    pub async fn deliver(
        &self,
        conversation_id: &ConversationId,
        target: &str,
        text: &str,
    ) -> Result<(), EscalationError> {
        let result = match tokio::time::timeout(self.timeout, self.dispatcher.send(target, text))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EscalationError::DispatchFailure {
                target: target.to_string(),
                message: format!("timed out after {}ms", self.timeout.as_millis()),
            }),
        };

        match &result {
            Ok(()) => tracing::info!(
                event_name = "notification.delivered",
                conversation_id = %conversation_id,
                target,
                "notification delivered"
            ),
            Err(error) => tracing::warn!(
                event_name = "notification.failed",
                conversation_id = %conversation_id,
                target,
                error = %error,
                "notification delivery failed"
            ),
        }
        result
    }
}
