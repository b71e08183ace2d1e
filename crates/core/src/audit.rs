use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    IntentEvaluated,
    WindowClosed,
    AwaitingThreshold,
    ThresholdFired,
    DispatchSkipped,
    ManagerEscalated,
    ManagerEscalationAverted,
    ChecklistFindings,
    Resolved,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentEvaluated => "intent_evaluated",
            Self::WindowClosed => "window_closed",
            Self::AwaitingThreshold => "awaiting_threshold",
            Self::ThresholdFired => "threshold_fired",
            Self::DispatchSkipped => "dispatch_skipped",
            Self::ManagerEscalated => "manager_escalated",
            Self::ManagerEscalationAverted => "manager_escalation_averted",
            Self::ChecklistFindings => "checklist_findings",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            Self::IntentEvaluated,
            Self::WindowClosed,
            Self::AwaitingThreshold,
            Self::ThresholdFired,
            Self::DispatchSkipped,
            Self::ManagerEscalated,
            Self::ManagerEscalationAverted,
            Self::ChecklistFindings,
            Self::Resolved,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == raw)
    }
}

/// One escalation decision with its rationale, as handed to the semantic audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub record_id: String,
    pub conversation_id: ConversationId,
    pub agent: String,
    pub event_label: String,
    pub kind: DecisionKind,
    pub source_text: String,
    pub rationale: String,
    pub extra: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        conversation_id: ConversationId,
        agent: impl Into<String>,
        event_label: impl Into<String>,
        kind: DecisionKind,
        source_text: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            conversation_id,
            agent: agent.into(),
            event_label: event_label.into(),
            kind,
            source_text: source_text.into(),
            rationale: rationale.into(),
            extra: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// `RecordDecision`: fire-and-forget. Implementations swallow and log their own failures.
#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn record(&self, record: DecisionRecord);
}

/// Writes decisions to the structured log only.
#[derive(Clone, Debug, Default)]
pub struct TracingDecisionRecorder;

#[async_trait]
impl DecisionRecorder for TracingDecisionRecorder {
    async fn record(&self, record: DecisionRecord) {
        tracing::info!(
            event_name = "decision.recorded",
            correlation_id = %record.record_id,
            conversation_id = %record.conversation_id,
            agent = %record.agent,
            event_label = %record.event_label,
            kind = record.kind.as_str(),
            rationale = %record.rationale,
            "escalation decision recorded"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDecisionLog {
    records: Arc<Mutex<Vec<DecisionRecord>>>,
}

impl InMemoryDecisionLog {
    pub fn records(&self) -> Vec<DecisionRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<DecisionKind> {
        self.records().into_iter().map(|record| record.kind).collect()
    }
}

#[async_trait]
impl DecisionRecorder for InMemoryDecisionLog {
    async fn record(&self, record: DecisionRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
