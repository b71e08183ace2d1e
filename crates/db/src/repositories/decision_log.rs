use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;

use quotewatch_core::audit::{DecisionKind, DecisionRecord, DecisionRecorder};
use quotewatch_core::domain::conversation::ConversationId;

use super::{parse_timestamp, timestamp, DecisionLogRepository, RepositoryError};
use crate::DbPool;

/// `decision_log` table. As a [`DecisionRecorder`] it never fails the caller; write errors
/// are logged and the decision is still traced.
pub struct SqlDecisionLog {
    pool: DbPool,
}

impl SqlDecisionLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_decision(row: &sqlx::sqlite::SqliteRow) -> Result<DecisionRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agent: String = row.try_get("agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let event_label: String =
        row.try_get("event_label").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let kind: String = row.try_get("kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let source_text: String =
        row.try_get("source_text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let rationale: String =
        row.try_get("rationale").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let extra_json: String =
        row.try_get("extra_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recorded_at: String =
        row.try_get("recorded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let kind = DecisionKind::parse(&kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision kind `{kind}`")))?;
    let extra: BTreeMap<String, String> = serde_json::from_str(&extra_json)
        .map_err(|e| RepositoryError::Decode(format!("extra_json: {e}")))?;

    Ok(DecisionRecord {
        record_id: id,
        conversation_id: ConversationId(conversation_id),
        agent,
        event_label,
        kind,
        source_text,
        rationale,
        extra,
        recorded_at: parse_timestamp("recorded_at", &recorded_at)?,
    })
}

#[async_trait]
impl DecisionLogRepository for SqlDecisionLog {
    async fn append(&self, record: &DecisionRecord) -> Result<(), RepositoryError> {
        let extra_json =
            serde_json::to_string(&record.extra).map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO decision_log (id, conversation_id, agent, event_label, kind,
                                       source_text, rationale, extra_json, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.record_id)
        .bind(record.conversation_id.as_str())
        .bind(&record.agent)
        .bind(&record.event_label)
        .bind(record.kind.as_str())
        .bind(&record.source_text)
        .bind(&record.rationale)
        .bind(extra_json)
        .bind(timestamp(record.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<DecisionRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, conversation_id, agent, event_label, kind, source_text, rationale,
                    extra_json, recorded_at
             FROM decision_log
             WHERE conversation_id = ?
             ORDER BY recorded_at ASC, rowid ASC
             LIMIT ?",
        )
        .bind(conversation_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_decision).collect::<Result<Vec<_>, _>>()
    }
}

#[async_trait]
impl DecisionRecorder for SqlDecisionLog {
    async fn record(&self, record: DecisionRecord) {
        tracing::info!(
            event_name = "decision.recorded",
            correlation_id = %record.record_id,
            conversation_id = %record.conversation_id,
            agent = %record.agent,
            event_label = %record.event_label,
            kind = record.kind.as_str(),
            "escalation decision recorded"
        );
        if let Err(error) = self.append(&record).await {
            tracing::warn!(
                event_name = "decision.persist_failed",
                correlation_id = %record.record_id,
                conversation_id = %record.conversation_id,
                error = %error,
                "decision could not be written to decision_log"
            );
        }
    }
}
