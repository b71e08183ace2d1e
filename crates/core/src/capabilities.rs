//! Collaborator capabilities the escalation core consumes.
//!
//! Production adapters live in `quotewatch-agent` (classification), `quotewatch-notify`
//! (delivery) and `quotewatch-db` (responses, persistence). The in-memory versions here
//! back the core's own tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::conversation::{AgentContact, AgentResponse, ConversationId};
use crate::errors::EscalationError;

/// `ClassifyYesNo`: answers a prompt with free text expected to be "yes" or "no".
#[async_trait]
pub trait YesNoClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String, EscalationError>;
}

/// `SendNotification`: best-effort delivery to a phone number or group id.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, target: &str, text: &str) -> Result<(), EscalationError>;
}

/// `ResolveAgentForConversation`: maps the assigned agent to a reachable contact.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn resolve(&self, agent: &str) -> Option<AgentContact>;
}

/// `ObserveAgentResponse`: earliest reply by `agent` in a conversation at or after `since`.
/// Agent names compare without case.
#[async_trait]
pub trait ResponseObserver: Send + Sync {
    async fn observe_agent_response(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AgentResponse>, EscalationError>;
}

/// Directory built from the `[[agents]]` config table. Lookups ignore case.
#[derive(Clone, Debug, Default)]
pub struct StaticAgentDirectory {
    contacts: HashMap<String, AgentContact>,
}

impl StaticAgentDirectory {
    pub fn new(contacts: impl IntoIterator<Item = AgentContact>) -> Self {
        let contacts = contacts
            .into_iter()
            .filter(|contact| !contact.contact.trim().is_empty())
            .map(|contact| (contact.name.trim().to_lowercase(), contact))
            .collect();
        Self { contacts }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[async_trait]
impl AgentDirectory for StaticAgentDirectory {
    async fn resolve(&self, agent: &str) -> Option<AgentContact> {
        self.contacts.get(&agent.trim().to_lowercase()).cloned()
    }
}

/// Classifier that replays a fixed answer, or fails when none is set.
#[derive(Clone, Default)]
pub struct ScriptedClassifier {
    answer: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClassifier {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self { answer: Some(answer.into()), prompts: Arc::default() }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl YesNoClassifier for ScriptedClassifier {
    async fn classify(&self, prompt: &str) -> Result<String, EscalationError> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }
        self.answer
            .clone()
            .ok_or_else(|| EscalationError::ClassificationUnavailable("no scripted answer".into()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub target: String,
    pub text: String,
}

/// Dispatcher that keeps every message; can be switched to fail every send.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, target: &str, text: &str) -> Result<(), EscalationError> {
        let notification = SentNotification { target: target.to_string(), text: text.to_string() };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        if self.failing {
            return Err(EscalationError::DispatchFailure {
                target: target.to_string(),
                message: "gateway rejected message".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryResponseLog {
    responses: Arc<Mutex<Vec<AgentResponse>>>,
}

impl InMemoryResponseLog {
    pub fn push(&self, response: AgentResponse) {
        match self.responses.lock() {
            Ok(mut responses) => responses.push(response),
            Err(poisoned) => poisoned.into_inner().push(response),
        }
    }
}

#[async_trait]
impl ResponseObserver for InMemoryResponseLog {
    async fn observe_agent_response(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AgentResponse>, EscalationError> {
        let agent = agent.trim();
        let responses = match self.responses.lock() {
            Ok(responses) => responses.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Ok(responses
            .into_iter()
            .filter(|response| {
                &response.conversation_id == conversation_id
                    && response.agent.trim().eq_ignore_ascii_case(agent)
                    && response.responded_at >= since
            })
            .min_by_key(|response| response.responded_at))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        AgentDirectory, InMemoryResponseLog, ResponseObserver, StaticAgentDirectory,
    };
    use crate::domain::conversation::{AgentContact, AgentResponse, ConversationId};

    #[tokio::test]
    async fn static_directory_ignores_case_and_blank_contacts() {
        let directory = StaticAgentDirectory::new([
            AgentContact { name: "Carla".to_string(), contact: "5511999990000".to_string() },
            AgentContact { name: "Bruno".to_string(), contact: "  ".to_string() },
        ]);

        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.resolve(" carla ").await.map(|contact| contact.contact),
            Some("5511999990000".to_string())
        );
        assert!(directory.resolve("bruno").await.is_none());
    }

    #[tokio::test]
    async fn response_log_returns_earliest_reply_by_the_agent_after_cutoff() {
        let log = InMemoryResponseLog::default();
        let conversation = ConversationId("maria".to_string());
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("instant");
        for (agent, minutes) in [("Carla", -5), ("Bruno", 1), ("Carla", 7), ("carla ", 3)] {
            log.push(AgentResponse {
                conversation_id: conversation.clone(),
                agent: agent.to_string(),
                text: format!("reply at {minutes}"),
                responded_at: base + Duration::minutes(minutes),
            });
        }

        let observed = log
            .observe_agent_response(&conversation, "Carla", base)
            .await
            .expect("observation succeeds");
        assert_eq!(observed.map(|response| response.text), Some("reply at 3".to_string()));

        let other_agent = log
            .observe_agent_response(&conversation, "Joana", base)
            .await
            .expect("observation succeeds");
        assert!(other_agent.is_none());

        let other = log
            .observe_agent_response(&ConversationId("joao".to_string()), "Carla", base)
            .await
            .expect("observation succeeds");
        assert!(other.is_none());
    }
}
