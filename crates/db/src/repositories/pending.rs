use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use quotewatch_core::domain::conversation::{ConversationId, InboundMessage};

use super::{timestamp, PendingQuoteRepository, RepositoryError};
use crate::DbPool;

/// Conversations the sweep keeps re-evaluating; reloaded on startup.
pub struct SqlPendingQuoteRepository {
    pool: DbPool,
}

impl SqlPendingQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<InboundMessage, RepositoryError> {
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let client_name: String =
        row.try_get("client_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agent: String = row.try_get("agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let text: String = row.try_get("text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quote_requested_at: String =
        row.try_get("quote_requested_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(InboundMessage {
        conversation_id: ConversationId(conversation_id),
        client_name,
        agent,
        text,
        quote_requested_at,
    })
}

#[async_trait]
impl PendingQuoteRepository for SqlPendingQuoteRepository {
    async fn load_all(&self) -> Result<Vec<InboundMessage>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT conversation_id, client_name, agent, text, quote_requested_at
             FROM pending_quote ORDER BY conversation_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()
    }

    async fn upsert(&self, message: &InboundMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO pending_quote (conversation_id, client_name, agent, text,
                                        quote_requested_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 client_name = excluded.client_name,
                 agent = excluded.agent,
                 text = excluded.text,
                 quote_requested_at = excluded.quote_requested_at,
                 updated_at = excluded.updated_at",
        )
        .bind(message.conversation_id.as_str())
        .bind(&message.client_name)
        .bind(&message.agent)
        .bind(&message.text)
        .bind(&message.quote_requested_at)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, conversation_id: &ConversationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM pending_quote WHERE conversation_id = ?")
            .bind(conversation_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
