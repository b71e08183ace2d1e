use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use quotewatch_core::capabilities::ResponseObserver;
use quotewatch_core::domain::conversation::{AgentResponse, ConversationId};
use quotewatch_core::errors::EscalationError;

use super::{parse_timestamp, timestamp, RepositoryError, ResponseRepository};
use crate::DbPool;

/// Agent replies reported through ingress; backs `ObserveAgentResponse`.
pub struct SqlResponseRepository {
    pool: DbPool,
}

impl SqlResponseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_response(row: &sqlx::sqlite::SqliteRow) -> Result<AgentResponse, RepositoryError> {
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agent: String = row.try_get("agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let text: String = row.try_get("text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let responded_at: String =
        row.try_get("responded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(AgentResponse {
        conversation_id: ConversationId(conversation_id),
        agent,
        text,
        responded_at: parse_timestamp("responded_at", &responded_at)?,
    })
}

#[async_trait]
impl ResponseRepository for SqlResponseRepository {
    async fn record_response(&self, response: &AgentResponse) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agent_response (conversation_id, agent, text, responded_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(response.conversation_id.as_str())
        .bind(&response.agent)
        .bind(&response.text)
        .bind(timestamp(response.responded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn earliest_since(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AgentResponse>, RepositoryError> {
        let row = sqlx::query(
            "SELECT conversation_id, agent, text, responded_at
             FROM agent_response
             WHERE conversation_id = ?
               AND TRIM(agent) = ? COLLATE NOCASE
               AND responded_at >= ?
             ORDER BY responded_at ASC, id ASC
             LIMIT 1",
        )
        .bind(conversation_id.as_str())
        .bind(agent.trim())
        .bind(timestamp(since))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_response(r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ResponseObserver for SqlResponseRepository {
    async fn observe_agent_response(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<AgentResponse>, EscalationError> {
        self.earliest_since(conversation_id, agent, since)
            .await
            .map_err(|error| EscalationError::ObservationUnavailable(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use quotewatch_core::capabilities::ResponseObserver;
    use quotewatch_core::domain::conversation::{AgentResponse, ConversationId};

    use super::SqlResponseRepository;
    use crate::repositories::ResponseRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn earliest_reply_by_the_agent_at_or_after_cutoff_is_observed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlResponseRepository::new(pool);
        let conversation = ConversationId("maria souza".to_string());
        let armed_at = Utc.with_ymd_and_hms(2026, 3, 5, 13, 0, 0).single().expect("instant");

        for (agent, minutes) in [("Carla", -30), ("Bruno", 2), ("Carla", 8), ("CARLA", 4)] {
            repo.record_response(&AgentResponse {
                conversation_id: conversation.clone(),
                agent: agent.to_string(),
                text: format!("reply {minutes}"),
                responded_at: armed_at + Duration::minutes(minutes),
            })
            .await
            .expect("record");
        }

        let observed = repo
            .observe_agent_response(&conversation, "carla", armed_at)
            .await
            .expect("observe")
            .expect("a reply after the cutoff");
        assert_eq!(observed.text, "reply 4");
        assert_eq!(observed.responded_at, armed_at + Duration::minutes(4));

        let other_agent = repo
            .observe_agent_response(&conversation, "Joana", armed_at)
            .await
            .expect("observe");
        assert!(other_agent.is_none());

        let none = repo
            .observe_agent_response(&conversation, "Carla", armed_at + Duration::minutes(9))
            .await
            .expect("observe");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn missing_schema_surfaces_as_observation_failure() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let repo = SqlResponseRepository::new(pool);

        let error = repo
            .observe_agent_response(&ConversationId("maria".to_string()), "Carla", Utc::now())
            .await
            .expect_err("no table");
        assert!(matches!(
            error,
            quotewatch_core::errors::EscalationError::ObservationUnavailable(_)
        ));
    }
}
