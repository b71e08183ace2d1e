use std::sync::Arc;

use async_trait::async_trait;
use quotewatch_core::capabilities::YesNoClassifier;
use quotewatch_core::errors::EscalationError;

use crate::llm::LlmClient;

/// `ClassifyYesNo` backed by a chat model. Interpreting the answer stays in the intent gate.
pub struct LlmYesNoClassifier {
    client: Arc<dyn LlmClient>,
}

impl LlmYesNoClassifier {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl YesNoClassifier for LlmYesNoClassifier {
    async fn classify(&self, prompt: &str) -> Result<String, EscalationError> {
        self.client.complete(prompt).await.map_err(|error| {
            tracing::warn!(
                event_name = "llm.classification_failed",
                error = %error,
                "yes/no classification unavailable"
            );
            EscalationError::ClassificationUnavailable(error.to_string())
        })
    }
}
