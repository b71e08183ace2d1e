use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use quotewatch_core::audit::DecisionRecord;
use quotewatch_core::domain::conversation::{AgentResponse, ConversationId, InboundMessage};
use quotewatch_core::errors::EscalationError;
use quotewatch_core::escalation::state::AlertRecord;

pub mod alert;
pub mod decision_log;
pub mod pending;
pub mod response;

pub use alert::SqlAlertRepository;
pub use decision_log::SqlDecisionLog;
pub use pending::SqlPendingQuoteRepository;
pub use response::SqlResponseRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for EscalationError {
    fn from(error: RepositoryError) -> Self {
        EscalationError::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn find(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AlertRecord>, RepositoryError>;
    async fn load_all(&self) -> Result<Vec<AlertRecord>, RepositoryError>;
    async fn upsert(&self, record: &AlertRecord) -> Result<(), RepositoryError>;
    async fn delete(&self, conversation_id: &ConversationId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait DecisionLogRepository: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<(), RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, RepositoryError>;
}

#[async_trait]
pub trait ResponseRepository: Send + Sync {
    async fn record_response(&self, response: &AgentResponse) -> Result<(), RepositoryError>;
    async fn earliest_since(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AgentResponse>, RepositoryError>;
}

#[async_trait]
pub trait PendingQuoteRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<InboundMessage>, RepositoryError>;
    async fn upsert(&self, message: &InboundMessage) -> Result<(), RepositoryError>;
    async fn delete(&self, conversation_id: &ConversationId) -> Result<bool, RepositoryError>;
}

/// Fixed-width UTC text so stored timestamps compare correctly as strings.
pub(crate) fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}
