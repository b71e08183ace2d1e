use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::Row;

use quotewatch_core::domain::conversation::ConversationId;
use quotewatch_core::errors::EscalationError;
use quotewatch_core::escalation::state::AlertRecord;
use quotewatch_core::escalation::store::AlertPersistence;

use super::{parse_timestamp, timestamp, AlertRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAlertRepository {
    pool: DbPool,
}

impl SqlAlertRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Result<AlertRecord, RepositoryError> {
    let conversation_id: String =
        row.try_get("conversation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let assigned_agent: String =
        row.try_get("assigned_agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let client_name: String =
        row.try_get("client_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let fired_json: String =
        row.try_get("fired_thresholds_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let manager_escalated: i64 =
        row.try_get("manager_escalated").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let final_fired_at: Option<String> =
        row.try_get("final_fired_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let fired_thresholds: BTreeSet<String> = serde_json::from_str(&fired_json)
        .map_err(|e| RepositoryError::Decode(format!("fired_thresholds_json: {e}")))?;

    Ok(AlertRecord {
        conversation_id: ConversationId(conversation_id),
        assigned_agent,
        client_name,
        fired_thresholds,
        manager_escalated: manager_escalated != 0,
        final_fired_at: final_fired_at
            .as_deref()
            .map(|raw| parse_timestamp("final_fired_at", raw))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl AlertRepository for SqlAlertRepository {
    async fn find(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AlertRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT conversation_id, assigned_agent, client_name, fired_thresholds_json,
                    manager_escalated, final_fired_at, created_at, updated_at
             FROM alert_record WHERE conversation_id = ?",
        )
        .bind(conversation_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_alert(r)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<AlertRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT conversation_id, assigned_agent, client_name, fired_thresholds_json,
                    manager_escalated, final_fired_at, created_at, updated_at
             FROM alert_record ORDER BY conversation_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_alert).collect::<Result<Vec<_>, _>>()
    }

    async fn upsert(&self, record: &AlertRecord) -> Result<(), RepositoryError> {
        let fired_json = serde_json::to_string(&record.fired_thresholds)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO alert_record (conversation_id, assigned_agent, client_name,
                                       fired_thresholds_json, manager_escalated,
                                       final_fired_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 assigned_agent = excluded.assigned_agent,
                 client_name = excluded.client_name,
                 fired_thresholds_json = excluded.fired_thresholds_json,
                 manager_escalated = excluded.manager_escalated,
                 final_fired_at = excluded.final_fired_at,
                 updated_at = excluded.updated_at",
        )
        .bind(record.conversation_id.as_str())
        .bind(&record.assigned_agent)
        .bind(&record.client_name)
        .bind(fired_json)
        .bind(i64::from(record.manager_escalated))
        .bind(record.final_fired_at.map(timestamp))
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, conversation_id: &ConversationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM alert_record WHERE conversation_id = ?")
            .bind(conversation_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AlertPersistence for SqlAlertRepository {
    async fn save(&self, record: &AlertRecord) -> Result<(), EscalationError> {
        self.upsert(record).await.map_err(EscalationError::from)
    }

    async fn remove(&self, conversation_id: &ConversationId) -> Result<(), EscalationError> {
        self.delete(conversation_id).await.map(|_| ()).map_err(EscalationError::from)
    }
}
