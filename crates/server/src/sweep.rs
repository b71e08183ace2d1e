use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use quotewatch_core::domain::conversation::{ConversationId, InboundMessage};
use quotewatch_core::errors::EscalationError;
use quotewatch_core::escalation::engine::EvaluationOutcome;
use quotewatch_db::PendingQuoteRepository;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingress::AppState;

/// Where a message came from; decides what a "not awaiting" verdict does to tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Ingress,
    Sweep,
}

/// Latest qualifying inbound message per conversation, re-evaluated on every sweep tick.
///
/// With a store attached, changes are written through so a restart resumes the sweep.
/// Write failures are logged and the in-memory set stays authoritative.
#[derive(Default)]
pub struct PendingQuotes {
    messages: Mutex<HashMap<ConversationId, InboundMessage>>,
    store: Option<Arc<dyn PendingQuoteRepository>>,
}

impl PendingQuotes {
    pub fn with_store(store: Arc<dyn PendingQuoteRepository>) -> Self {
        Self { messages: Mutex::default(), store: Some(store) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConversationId, InboundMessage>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Loads persisted messages without writing them back.
    pub fn hydrate(&self, messages: Vec<InboundMessage>) -> usize {
        let mut guard = self.lock();
        let count = messages.len();
        for message in messages {
            guard.insert(message.conversation_id.clone(), message);
        }
        count
    }

    pub async fn remember(&self, message: InboundMessage) {
        let previous = self.lock().insert(message.conversation_id.clone(), message.clone());
        if previous.as_ref() == Some(&message) {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(error) = store.upsert(&message).await {
                warn!(
                    event_name = "sweep.pending_persist_failed",
                    conversation_id = %message.conversation_id,
                    error = %error,
                    "pending quote could not be persisted"
                );
            }
        }
    }

    pub async fn forget(&self, conversation_id: &ConversationId) -> bool {
        let removed = self.lock().remove(conversation_id).is_some();
        if removed {
            if let Some(store) = &self.store {
                if let Err(error) = store.delete(conversation_id).await {
                    warn!(
                        event_name = "sweep.pending_delete_failed",
                        conversation_id = %conversation_id,
                        error = %error,
                        "pending quote could not be removed from storage"
                    );
                }
            }
        }
        removed
    }

    #[cfg(test)]
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.lock().contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<InboundMessage> {
        let mut messages: Vec<_> = self.lock().values().cloned().collect();
        messages.sort_by(|left, right| left.conversation_id.cmp(&right.conversation_id));
        messages
    }

    /// Updates tracking from one evaluation result.
    ///
    /// A conversation stays tracked while a threshold can still fire. A fire may leave lower
    /// thresholds unfired, so only a below-threshold verdict with nothing above ends tracking.
    /// Off-hours messages are kept because their intent has not been judged yet. A negative
    /// verdict on a fresh message leaves the earlier pending message in place.
    pub async fn track(
        &self,
        message: &InboundMessage,
        result: &Result<EvaluationOutcome, EscalationError>,
        source: Source,
    ) {
        let conversation_id = &message.conversation_id;
        match result {
            Ok(EvaluationOutcome::OutsideBusinessWindow)
            | Ok(EvaluationOutcome::ThresholdFired { .. })
            | Ok(EvaluationOutcome::BelowThreshold { next_threshold: Some(_), .. }) => {
                self.remember(message.clone()).await;
            }
            Ok(EvaluationOutcome::BelowThreshold { next_threshold: None, .. }) => {
                self.forget(conversation_id).await;
            }
            Ok(EvaluationOutcome::NotAwaitingQuote { .. }) => {
                if source == Source::Sweep {
                    self.forget(conversation_id).await;
                }
            }
            Err(EscalationError::MalformedConversationTimestamp { .. }) => {
                self.forget(conversation_id).await;
            }
            Err(_) => {}
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub fired: usize,
    pub failed: usize,
}

pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    for message in state.pending.snapshot() {
        let result = state.engine.evaluate(&message, now).await;
        report.evaluated += 1;
        match &result {
            Ok(outcome) if outcome.is_action() => report.fired += 1,
            Ok(_) => {}
            Err(error) => {
                report.failed += 1;
                warn!(
                    event_name = "sweep.evaluation_failed",
                    conversation_id = %message.conversation_id,
                    agent = %message.agent,
                    error = %error,
                    "pending conversation could not be evaluated"
                );
            }
        }
        state.pending.track(&message, &result, Source::Sweep).await;
    }
    report
}

/// Re-evaluates pending conversations every `interval` until `shutdown` is cancelled.
pub async fn run(state: AppState, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    info!(
        event_name = "sweep.started",
        correlation_id = "sweep",
        interval_secs = interval.as_secs(),
        "pending-quote sweep started"
    );
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let report = sweep_once(&state, state.now()).await;
                debug!(
                    event_name = "sweep.completed",
                    correlation_id = "sweep",
                    evaluated = report.evaluated,
                    fired = report.fired,
                    failed = report.failed,
                    "pending-quote sweep pass finished"
                );
            }
        }
    }
    info!(event_name = "sweep.stopped", correlation_id = "sweep", "pending-quote sweep stopped");
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use quotewatch_core::domain::conversation::{ConversationId, InboundMessage};
    use quotewatch_core::errors::EscalationError;
    use quotewatch_core::escalation::engine::EvaluationOutcome;

    use std::sync::Arc;

    use quotewatch_db::{
        connect_with_settings, migrations, PendingQuoteRepository, SqlPendingQuoteRepository,
    };

    use super::{sweep_once, PendingQuotes, Source};
    use crate::ingress::tests::{message, test_state};

    fn inbound(client: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: ConversationId::from_client_name(client),
            client_name: client.to_string(),
            agent: "Carla".to_string(),
            text: "e o orçamento?".to_string(),
            quote_requested_at: "2026-03-03T08:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn tracking_follows_whether_a_threshold_can_still_fire() {
        let pending = PendingQuotes::default();
        let maria = inbound("Maria");

        pending.track(
            &maria,
            &Ok(EvaluationOutcome::BelowThreshold {
                elapsed_hours: 2,
                next_threshold: Some("6h".to_string()),
            }),
            Source::Ingress,
        )
        .await;
        assert!(pending.contains(&maria.conversation_id));

        pending.track(
            &maria,
            &Ok(EvaluationOutcome::NotAwaitingQuote { rationale: "thanks".to_string() }),
            Source::Ingress,
        )
        .await;
        assert!(pending.contains(&maria.conversation_id), "a courtesy reply keeps the pending quote");

        pending.track(
            &maria,
            &Ok(EvaluationOutcome::ThresholdFired {
                threshold: "18h".to_string(),
                elapsed_hours: 19,
                delivered: true,
                watchdog_armed: true,
            }),
            Source::Sweep,
        )
        .await;
        assert!(
            pending.contains(&maria.conversation_id),
            "a late final alert leaves the lower thresholds to fire"
        );

        pending.track(
            &maria,
            &Ok(EvaluationOutcome::BelowThreshold { elapsed_hours: 20, next_threshold: None }),
            Source::Sweep,
        )
        .await;
        assert!(pending.is_empty());

        let joao = inbound("Joao");
        pending.remember(joao.clone()).await;
        pending.track(
            &joao,
            &Err(EscalationError::MalformedConversationTimestamp {
                conversation_id: "joao".to_string(),
                raw: "ontem".to_string(),
            }),
            Source::Sweep,
        )
        .await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn sweep_fires_thresholds_without_new_messages() {
        let fixture = test_state().await;
        let pending = message("Maria Souza", "cadê o orçamento?", "2026-03-04T10:00:00");
        fixture.state.pending.remember(pending.clone()).await;

        // Wednesday 12:00 in São Paulo: 2 business hours, nothing due yet.
        let early = Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).single().expect("instant");
        let report = sweep_once(&fixture.state, early).await;
        assert_eq!((report.evaluated, report.fired), (1, 0));
        assert!(fixture.dispatcher.sent().is_empty());

        // Wednesday 17:00 local: 7 business hours, the 6h alert fires.
        let later = Utc.with_ymd_and_hms(2026, 3, 4, 20, 0, 0).single().expect("instant");
        let report = sweep_once(&fixture.state, later).await;
        assert_eq!((report.evaluated, report.fired), (1, 1));
        assert_eq!(fixture.dispatcher.sent().len(), 1);
        assert!(fixture.state.pending.contains(&pending.conversation_id));

        // Same instant again: the 6h threshold does not fire twice.
        let report = sweep_once(&fixture.state, later).await;
        assert_eq!(report.fired, 0);
        assert_eq!(fixture.dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn pending_quotes_survive_a_restart_through_the_store() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = Arc::new(SqlPendingQuoteRepository::new(pool));

        let pending = PendingQuotes::with_store(store.clone());
        let maria = inbound("Maria");
        let joao = inbound("Joao");
        pending.remember(maria.clone()).await;
        pending.remember(joao.clone()).await;
        pending.forget(&joao.conversation_id).await;

        let restarted = PendingQuotes::with_store(store.clone());
        assert_eq!(restarted.hydrate(store.load_all().await.expect("load")), 1);
        assert!(restarted.contains(&maria.conversation_id));
        assert!(!restarted.contains(&joao.conversation_id));
    }
}
