use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use crate::audit::{DecisionKind, DecisionRecord, DecisionRecorder};
use crate::capabilities::ResponseObserver;
use crate::dispatch::Delivery;
use crate::domain::conversation::{AgentResponse, ConversationId};
use crate::escalation::state::{AlertRecord, Threshold};
use crate::escalation::store::{AlertStore, ManagerMark};
use crate::templates::{MessageTemplates, MANAGER_ESCALATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    AlreadyArmed,
    AlreadyEscalated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotArmed,
    /// The expiry had already committed to escalating; the cancellation did not stop it.
    EscalationCommitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Escalated { delivered: usize },
    ResponseObserved,
    Cancelled,
    AlreadyEscalated,
    /// No alert record carries the final threshold; nothing is sent.
    NotEligible,
    NotArmed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WatchPhase {
    Waiting,
    Committed,
}

#[derive(Clone)]
struct ArmedWatch {
    id: u64,
    token: CancellationToken,
    agent: String,
    client_name: String,
    armed_at: DateTime<Utc>,
    phase: WatchPhase,
}

pub struct WatchdogSettings {
    pub grace: std::time::Duration,
    pub manager_targets: Vec<String>,
    pub final_threshold: Threshold,
}

struct WatchdogInner {
    watches: Mutex<HashMap<ConversationId, ArmedWatch>>,
    next_id: AtomicU64,
    store: AlertStore,
    observer: Arc<dyn ResponseObserver>,
    delivery: Delivery,
    recorder: Arc<dyn DecisionRecorder>,
    templates: Arc<MessageTemplates>,
    settings: WatchdogSettings,
}

/// Deferred manager escalation after the final agent alert.
///
/// At most one watch is armed per conversation. Cancellation and expiry race on the same
/// map lock: whichever takes it first wins, and once a cancellation is acknowledged the
/// expiry never dispatches.
#[derive(Clone)]
pub struct ResponseWatchdog {
    inner: Arc<WatchdogInner>,
}

impl ResponseWatchdog {
    pub fn new(
        store: AlertStore,
        observer: Arc<dyn ResponseObserver>,
        delivery: Delivery,
        recorder: Arc<dyn DecisionRecorder>,
        templates: Arc<MessageTemplates>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                watches: Mutex::default(),
                next_id: AtomicU64::new(1),
                store,
                observer,
                delivery,
                recorder,
                templates,
                settings,
            }),
        }
    }

    pub fn is_armed(&self, conversation_id: &ConversationId) -> bool {
        self.lock_watches().contains_key(conversation_id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock_watches().len()
    }

    /// Schedules the expiry check `grace` after now on a background task.
    pub async fn arm_escalation(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        client_name: &str,
        armed_at: DateTime<Utc>,
    ) -> ArmOutcome {
        let grace = self.inner.settings.grace;
        self.arm_with_delay(conversation_id, agent, client_name, armed_at, grace).await
    }

    /// Re-arms a watch for a rehydrated record whose final alert fired before a restart.
    ///
    /// The expiry runs at `final_fired_at + grace`, or right away when that moment has
    /// already passed. Records without the final alert, or already escalated, are skipped.
    pub async fn resume(&self, record: &AlertRecord, now: DateTime<Utc>) -> Option<ArmOutcome> {
        let final_label = &self.inner.settings.final_threshold.label;
        if record.manager_escalated || !record.fired_thresholds.contains(final_label) {
            return None;
        }

        let armed_at = record.final_fired_at.unwrap_or(record.updated_at);
        let elapsed = (now - armed_at).to_std().unwrap_or_default();
        let remaining = self.inner.settings.grace.saturating_sub(elapsed);
        let outcome = self
            .arm_with_delay(
                &record.conversation_id,
                &record.assigned_agent,
                &record.client_name,
                armed_at,
                remaining,
            )
            .await;
        tracing::info!(
            event_name = "watchdog.resumed",
            conversation_id = %record.conversation_id,
            remaining_secs = remaining.as_secs(),
            outcome = ?outcome,
            "manager escalation watchdog resumed after restart"
        );
        Some(outcome)
    }

    async fn arm_with_delay(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        client_name: &str,
        armed_at: DateTime<Utc>,
        delay: std::time::Duration,
    ) -> ArmOutcome {
        if let Some(record) = self.inner.store.get(conversation_id).await {
            if record.manager_escalated {
                return ArmOutcome::AlreadyEscalated;
            }
        }

        let token = CancellationToken::new();
        {
            let mut watches = self.lock_watches();
            if watches.contains_key(conversation_id) {
                return ArmOutcome::AlreadyArmed;
            }
            watches.insert(
                conversation_id.clone(),
                ArmedWatch {
                    id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
                    token: token.clone(),
                    agent: agent.to_string(),
                    client_name: client_name.to_string(),
                    armed_at,
                    phase: WatchPhase::Waiting,
                },
            );
        }

        tracing::info!(
            event_name = "watchdog.armed",
            conversation_id = %conversation_id,
            agent,
            delay_secs = delay.as_secs(),
            "manager escalation watchdog armed"
        );

        let watchdog = self.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    watchdog.expire(&conversation_id).await;
                }
            }
        });

        ArmOutcome::Armed
    }

    pub fn cancel(&self, conversation_id: &ConversationId) -> CancelOutcome {
        let mut watches = self.lock_watches();
        let Some(watch) = watches.get(conversation_id) else {
            return CancelOutcome::NotArmed;
        };
        if watch.phase == WatchPhase::Committed {
            tracing::warn!(
                event_name = "watchdog.cancel_too_late",
                conversation_id = %conversation_id,
                "cancellation arrived after escalation was committed"
            );
            return CancelOutcome::EscalationCommitted;
        }
        watch.token.cancel();
        watches.remove(conversation_id);
        tracing::info!(
            event_name = "watchdog.cancelled",
            conversation_id = %conversation_id,
            "manager escalation watchdog cancelled"
        );
        CancelOutcome::Cancelled
    }

    /// Runs the grace-period check now. The armed task calls this on expiry.
    pub async fn expire(&self, conversation_id: &ConversationId) -> ExpiryOutcome {
        let watch = self.lock_watches().get(conversation_id).cloned();
        let Some(watch) = watch else {
            return ExpiryOutcome::NotArmed;
        };
        if watch.token.is_cancelled() {
            return ExpiryOutcome::Cancelled;
        }

        let response = self.qualifying_response(conversation_id, &watch).await;

        if !self.commit(conversation_id, watch.id) {
            return ExpiryOutcome::Cancelled;
        }

        let outcome = match response {
            Some(response) => {
                self.inner
                    .recorder
                    .record(
                        DecisionRecord::new(
                            conversation_id.clone(),
                            &watch.agent,
                            "manager_escalation",
                            DecisionKind::ManagerEscalationAverted,
                            &response.text,
                            "agent responded within the grace period",
                        )
                        .with_extra("responded_at", response.responded_at.to_rfc3339()),
                    )
                    .await;
                ExpiryOutcome::ResponseObserved
            }
            None => self.escalate(conversation_id, &watch).await,
        };
        self.release(conversation_id, watch.id);
        outcome
    }

    async fn escalate(&self, conversation_id: &ConversationId, watch: &ArmedWatch) -> ExpiryOutcome {
        let mark = self
            .inner
            .store
            .mark_manager_escalated(conversation_id, &self.inner.settings.final_threshold, Utc::now())
            .await;
        match mark {
            Ok(ManagerMark::AlreadyEscalated) => return ExpiryOutcome::AlreadyEscalated,
            Ok(ManagerMark::Marked) => {}
            Ok(mark @ (ManagerMark::NoRecord | ManagerMark::FinalThresholdNotFired)) => {
                tracing::warn!(
                    event_name = "watchdog.final_threshold_missing",
                    conversation_id = %conversation_id,
                    mark = ?mark,
                    "final threshold is not recorded; skipping manager escalation"
                );
                self.inner
                    .recorder
                    .record(DecisionRecord::new(
                        conversation_id.clone(),
                        &watch.agent,
                        "manager_escalation",
                        DecisionKind::DispatchSkipped,
                        "",
                        "final threshold not recorded for this conversation",
                    ))
                    .await;
                return ExpiryOutcome::NotEligible;
            }
            Err(error) => {
                tracing::error!(
                    event_name = "watchdog.persist_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "could not persist manager escalation flag; escalating anyway"
                );
            }
        }

        let text = match self.inner.templates.render_alert(
            MANAGER_ESCALATION,
            &watch.agent,
            &watch.client_name,
        ) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(
                    event_name = "watchdog.template_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "manager escalation template failed to render"
                );
                return ExpiryOutcome::Escalated { delivered: 0 };
            }
        };

        let mut delivered = 0;
        for target in &self.inner.settings.manager_targets {
            if self.inner.delivery.deliver(conversation_id, target, &text).await.is_ok() {
                delivered += 1;
            }
        }

        self.inner
            .recorder
            .record(
                DecisionRecord::new(
                    conversation_id.clone(),
                    &watch.agent,
                    "manager_escalation",
                    DecisionKind::ManagerEscalated,
                    &text,
                    "no qualifying agent response within the grace period after the final alert",
                )
                .with_extra("delivered", delivered.to_string())
                .with_extra("targets", self.inner.settings.manager_targets.len().to_string()),
            )
            .await;

        ExpiryOutcome::Escalated { delivered }
    }

    /// The assigned agent's earliest reply counts only if it landed inside
    /// `[armed_at, armed_at + grace]`.
    async fn qualifying_response(
        &self,
        conversation_id: &ConversationId,
        watch: &ArmedWatch,
    ) -> Option<AgentResponse> {
        let grace = ChronoDuration::from_std(self.inner.settings.grace)
            .unwrap_or_else(|_| ChronoDuration::minutes(10));
        let deadline = watch.armed_at + grace;
        match self
            .inner
            .observer
            .observe_agent_response(conversation_id, &watch.agent, watch.armed_at)
            .await
        {
            Ok(Some(response)) if response.responded_at <= deadline => Some(response),
            Ok(Some(response)) => {
                tracing::info!(
                    event_name = "watchdog.response_overdue",
                    conversation_id = %conversation_id,
                    responded_at = %response.responded_at,
                    "observed agent response is past the grace deadline"
                );
                None
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(
                    event_name = "watchdog.observation_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "could not observe agent response; treating as no response"
                );
                None
            }
        }
    }

    fn commit(&self, conversation_id: &ConversationId, watch_id: u64) -> bool {
        let mut watches = self.lock_watches();
        match watches.get_mut(conversation_id) {
            Some(watch)
                if watch.id == watch_id
                    && !watch.token.is_cancelled()
                    && watch.phase == WatchPhase::Waiting =>
            {
                watch.phase = WatchPhase::Committed;
                true
            }
            _ => false,
        }
    }

    fn release(&self, conversation_id: &ConversationId, watch_id: u64) {
        let mut watches = self.lock_watches();
        if watches.get(conversation_id).is_some_and(|watch| watch.id == watch_id) {
            watches.remove(conversation_id);
        }
    }

    fn lock_watches(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationId, ArmedWatch>> {
        match self.inner.watches.lock() {
            Ok(watches) => watches,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
