use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::conversation::ConversationId;
use crate::errors::EscalationError;
use crate::escalation::state::{AlertRecord, Threshold, ThresholdSet};

/// Write-through hook for alert records. Called while the conversation's lock is held.
#[async_trait]
pub trait AlertPersistence: Send + Sync {
    async fn save(&self, record: &AlertRecord) -> Result<(), EscalationError>;
    async fn remove(&self, conversation_id: &ConversationId) -> Result<(), EscalationError>;
}

#[derive(Clone, Debug, Default)]
pub struct NoopAlertPersistence;

#[async_trait]
impl AlertPersistence for NoopAlertPersistence {
    async fn save(&self, _record: &AlertRecord) -> Result<(), EscalationError> {
        Ok(())
    }

    async fn remove(&self, _conversation_id: &ConversationId) -> Result<(), EscalationError> {
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    record: Option<AlertRecord>,
    retired: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FireDecision {
    pub fired: Option<Threshold>,
    pub record: Option<AlertRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerMark {
    Marked,
    AlreadyEscalated,
    FinalThresholdNotFired,
    NoRecord,
}

/// Alert records keyed by conversation, each behind its own async lock.
///
/// The outer map lock is only held to look up or insert a slot and never across an await.
/// Deciding and recording a fire happens under the per-conversation lock, so two concurrent
/// evaluations of one conversation cannot both fire the same threshold.
#[derive(Clone)]
pub struct AlertStore {
    slots: Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<Slot>>>>>,
    persistence: Arc<dyn AlertPersistence>,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new(Arc::new(NoopAlertPersistence))
    }
}

impl AlertStore {
    pub fn new(persistence: Arc<dyn AlertPersistence>) -> Self {
        Self { slots: Arc::default(), persistence }
    }

    /// Loads previously persisted records, e.g. at boot.
    pub fn hydrate(&self, records: impl IntoIterator<Item = AlertRecord>) -> usize {
        let mut slots = self.lock_slots();
        let mut loaded = 0;
        for record in records {
            slots.insert(
                record.conversation_id.clone(),
                Arc::new(AsyncMutex::new(Slot { record: Some(record), retired: false })),
            );
            loaded += 1;
        }
        loaded
    }

    pub async fn get(&self, conversation_id: &ConversationId) -> Option<AlertRecord> {
        let slot = self.lock_slots().get(conversation_id).cloned()?;
        let guard = slot.lock().await;
        guard.record.clone()
    }

    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.lock_slots().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Atomically picks the eligible threshold and records it as fired.
    ///
    /// If persistence fails the in-memory change is rolled back so the next evaluation can
    /// fire it again.
    pub async fn fire_next(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        client_name: &str,
        thresholds: &ThresholdSet,
        elapsed_hours: u64,
        now: DateTime<Utc>,
    ) -> Result<FireDecision, EscalationError> {
        loop {
            let slot = self.slot(conversation_id);
            let mut guard = slot.lock().await;
            if guard.retired {
                continue;
            }

            let fired_so_far = guard
                .record
                .as_ref()
                .map(|record| record.fired_thresholds.clone())
                .unwrap_or_default();
            let Some(threshold) = thresholds.eligible(&fired_so_far, elapsed_hours).cloned() else {
                return Ok(FireDecision { fired: None, record: guard.record.clone() });
            };

            let previous = guard.record.clone();
            let record = guard.record.get_or_insert_with(|| {
                AlertRecord::new(conversation_id.clone(), agent, client_name, now)
            });
            record.assigned_agent = agent.to_string();
            record.fired_thresholds.insert(threshold.label.clone());
            if thresholds.is_final(&threshold) {
                record.final_fired_at = Some(now);
            }
            record.updated_at = now;
            let snapshot = record.clone();

            if let Err(error) = self.persistence.save(&snapshot).await {
                guard.record = previous;
                return Err(error);
            }
            return Ok(FireDecision { fired: Some(threshold), record: Some(snapshot) });
        }
    }

    /// Sets `manager_escalated` once, and only after the final threshold fired.
    pub async fn mark_manager_escalated(
        &self,
        conversation_id: &ConversationId,
        final_threshold: &Threshold,
        now: DateTime<Utc>,
    ) -> Result<ManagerMark, EscalationError> {
        let slot = self.lock_slots().get(conversation_id).cloned();
        let Some(slot) = slot else {
            return Ok(ManagerMark::NoRecord);
        };
        let mut guard = slot.lock().await;
        if guard.retired {
            return Ok(ManagerMark::NoRecord);
        }
        let Some(record) = guard.record.as_mut() else {
            return Ok(ManagerMark::NoRecord);
        };
        if record.manager_escalated {
            return Ok(ManagerMark::AlreadyEscalated);
        }
        if !record.fired_thresholds.contains(&final_threshold.label) {
            return Ok(ManagerMark::FinalThresholdNotFired);
        }

        record.manager_escalated = true;
        record.updated_at = now;
        let snapshot = record.clone();
        if let Err(error) = self.persistence.save(&snapshot).await {
            if let Some(record) = guard.record.as_mut() {
                record.manager_escalated = false;
            }
            return Err(error);
        }
        Ok(ManagerMark::Marked)
    }

    /// Drops the conversation's record. Evaluations already waiting on the old slot retry
    /// against a fresh one.
    pub async fn remove(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AlertRecord>, EscalationError> {
        let slot = self.lock_slots().get(conversation_id).cloned();
        let Some(slot) = slot else {
            self.persistence.remove(conversation_id).await?;
            return Ok(None);
        };
        let mut guard = slot.lock().await;
        guard.retired = true;
        {
            let mut slots = self.lock_slots();
            if slots.get(conversation_id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(conversation_id);
            }
        }
        self.persistence.remove(conversation_id).await?;
        Ok(guard.record.take())
    }

    fn slot(&self, conversation_id: &ConversationId) -> Arc<AsyncMutex<Slot>> {
        self.lock_slots().entry(conversation_id.clone()).or_default().clone()
    }

    fn lock_slots(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ConversationId, Arc<AsyncMutex<Slot>>>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
