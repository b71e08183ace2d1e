use std::sync::Arc;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::audit::{DecisionKind, DecisionRecord, DecisionRecorder};
use crate::calendar::{elapsed_business_hours, is_within_business_window, BusinessWindow};
use crate::capabilities::AgentDirectory;
use crate::dispatch::Delivery;
use crate::domain::conversation::{ConversationId, InboundMessage};
use crate::errors::EscalationError;
use crate::escalation::state::{AlertRecord, Threshold, ThresholdSet};
use crate::escalation::store::AlertStore;
use crate::intent::{IntentContext, IntentGate, IntentVerdict};
use crate::templates::MessageTemplates;
use crate::watchdog::{ArmOutcome, CancelOutcome, ResponseWatchdog};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    OutsideBusinessWindow,
    NotAwaitingQuote { rationale: String },
    BelowThreshold { elapsed_hours: u64, next_threshold: Option<String> },
    ThresholdFired {
        threshold: String,
        elapsed_hours: u64,
        delivered: bool,
        watchdog_armed: bool,
    },
}

impl EvaluationOutcome {
    pub fn is_action(&self) -> bool {
        matches!(self, Self::ThresholdFired { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub had_record: bool,
    pub watchdog_cancelled: bool,
}

/// Drives the per-conversation escalation state machine.
///
/// Classification runs before any lock is taken. Threshold selection and recording happen
/// atomically inside [`AlertStore::fire_next`]; delivery and decision logging follow once the
/// lock is released.
pub struct EscalationEngine {
    window: BusinessWindow,
    thresholds: ThresholdSet,
    intent: IntentGate,
    store: AlertStore,
    directory: Arc<dyn AgentDirectory>,
    delivery: Delivery,
    recorder: Arc<dyn DecisionRecorder>,
    templates: Arc<MessageTemplates>,
    watchdog: ResponseWatchdog,
}

pub struct EngineParts {
    pub window: BusinessWindow,
    pub thresholds: ThresholdSet,
    pub intent: IntentGate,
    pub store: AlertStore,
    pub directory: Arc<dyn AgentDirectory>,
    pub delivery: Delivery,
    pub recorder: Arc<dyn DecisionRecorder>,
    pub templates: Arc<MessageTemplates>,
    pub watchdog: ResponseWatchdog,
}

impl EscalationEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            window: parts.window,
            thresholds: parts.thresholds,
            intent: parts.intent,
            store: parts.store,
            directory: parts.directory,
            delivery: parts.delivery,
            recorder: parts.recorder,
            templates: parts.templates,
            watchdog: parts.watchdog,
        }
    }

    pub fn window(&self) -> &BusinessWindow {
        &self.window
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub fn watchdog(&self) -> &ResponseWatchdog {
        &self.watchdog
    }

    pub async fn alert_record(&self, conversation_id: &ConversationId) -> Option<AlertRecord> {
        self.store.get(conversation_id).await
    }

    /// Evaluates one inbound message at `now`.
    ///
    /// Returns `Err` only for a malformed quote timestamp or a failed alert write; every other
    /// collaborator failure degrades to a logged no-op.
    pub async fn evaluate(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, EscalationError> {
        let conversation_id = &message.conversation_id;
        let requested_at = parse_quote_timestamp(&message.quote_requested_at, &self.window)
            .ok_or_else(|| EscalationError::MalformedConversationTimestamp {
                conversation_id: conversation_id.to_string(),
                raw: message.quote_requested_at.clone(),
            })?;

        if !is_within_business_window(now, &self.window) {
            tracing::debug!(
                event_name = "escalation.window_closed",
                conversation_id = %conversation_id,
                "outside business window; evaluation skipped"
            );
            self.record(
                message,
                "window.closed",
                DecisionKind::WindowClosed,
                format!("{} is outside the business window", now.to_rfc3339()),
            )
            .await;
            return Ok(EvaluationOutcome::OutsideBusinessWindow);
        }

        let verdict = self
            .intent
            .evaluate(&IntentContext {
                conversation_id,
                agent: &message.agent,
                client_name: &message.client_name,
                recent_text: &message.text,
            })
            .await;
        if !verdict.awaiting_quote {
            return Ok(EvaluationOutcome::NotAwaitingQuote { rationale: verdict.rationale });
        }

        let elapsed_hours = elapsed_business_hours(requested_at, now, &self.window);
        let decision = self
            .store
            .fire_next(
                conversation_id,
                &message.agent,
                &message.client_name,
                &self.thresholds,
                elapsed_hours,
                now,
            )
            .await?;

        let Some(threshold) = decision.fired else {
            let next_threshold =
                self.thresholds.next_above(elapsed_hours).map(|threshold| threshold.label.clone());
            self.record(
                message,
                "waiting.below_next_threshold",
                DecisionKind::AwaitingThreshold,
                match &next_threshold {
                    Some(next) => format!(
                        "{elapsed_hours} business hours elapsed; waiting, below next threshold {next}"
                    ),
                    None => format!(
                        "{elapsed_hours} business hours elapsed; every threshold already fired"
                    ),
                },
            )
            .await;
            return Ok(EvaluationOutcome::BelowThreshold { elapsed_hours, next_threshold });
        };

        tracing::info!(
            event_name = "escalation.threshold_fired",
            conversation_id = %conversation_id,
            agent = %message.agent,
            threshold = %threshold.label,
            elapsed_hours,
            "alert threshold fired"
        );

        let delivered = self.notify_agent(message, &threshold, elapsed_hours, &verdict).await;

        let watchdog_armed = if self.thresholds.is_final(&threshold) {
            let armed = self
                .watchdog
                .arm_escalation(conversation_id, &message.agent, &message.client_name, now)
                .await;
            armed == ArmOutcome::Armed
        } else {
            false
        };

        Ok(EvaluationOutcome::ThresholdFired {
            threshold: threshold.label,
            elapsed_hours,
            delivered,
            watchdog_armed,
        })
    }

    /// The injectable resolution signal: forgets the episode and cancels a pending escalation.
    pub async fn resolve(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ResolutionOutcome, EscalationError> {
        let cancel = self.watchdog.cancel(conversation_id);
        let removed = self.store.remove(conversation_id).await?;
        let outcome = ResolutionOutcome {
            had_record: removed.is_some(),
            watchdog_cancelled: cancel == CancelOutcome::Cancelled,
        };

        tracing::info!(
            event_name = "conversation.resolved",
            conversation_id = %conversation_id,
            had_record = outcome.had_record,
            watchdog_cancelled = outcome.watchdog_cancelled,
            "conversation resolved"
        );
        self.recorder
            .record(
                DecisionRecord::new(
                    conversation_id.clone(),
                    removed.as_ref().map(|record| record.assigned_agent.as_str()).unwrap_or(""),
                    "conversation.resolved",
                    DecisionKind::Resolved,
                    "",
                    "resolution signal received",
                )
                .with_extra("watchdog", format!("{cancel:?}")),
            )
            .await;
        Ok(outcome)
    }

    async fn notify_agent(
        &self,
        message: &InboundMessage,
        threshold: &Threshold,
        elapsed_hours: u64,
        verdict: &IntentVerdict,
    ) -> bool {
        let Some(contact) = self.directory.resolve(&message.agent).await else {
            let error = EscalationError::UnknownAgentMapping(message.agent.clone());
            tracing::warn!(
                event_name = "escalation.dispatch_skipped",
                conversation_id = %message.conversation_id,
                agent = %message.agent,
                error = %error,
                "alert recorded but not dispatched"
            );
            self.record(
                message,
                &threshold.label,
                DecisionKind::DispatchSkipped,
                error.to_string(),
            )
            .await;
            return false;
        };

        let text = match self.templates.render_alert(
            &threshold.template_id,
            &contact.name,
            &message.client_name,
        ) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(
                    event_name = "escalation.template_failed",
                    conversation_id = %message.conversation_id,
                    template = %threshold.template_id,
                    error = %error,
                    "alert template failed to render"
                );
                self.record(
                    message,
                    &threshold.label,
                    DecisionKind::DispatchSkipped,
                    error.to_string(),
                )
                .await;
                return false;
            }
        };

        let delivered = self
            .delivery
            .deliver(&message.conversation_id, &contact.contact, &text)
            .await
            .is_ok();

        self.recorder
            .record(
                DecisionRecord::new(
                    message.conversation_id.clone(),
                    &message.agent,
                    &threshold.label,
                    DecisionKind::ThresholdFired,
                    &message.text,
                    format!(
                        "{elapsed_hours} business hours elapsed; {} threshold fired",
                        threshold.label
                    ),
                )
                .with_extra("elapsed_hours", elapsed_hours.to_string())
                .with_extra("delivered", delivered.to_string())
                .with_extra("intent", verdict.rationale.clone()),
            )
            .await;
        delivered
    }

    async fn record(
        &self,
        message: &InboundMessage,
        label: &str,
        kind: DecisionKind,
        rationale: String,
    ) {
        self.recorder
            .record(DecisionRecord::new(
                message.conversation_id.clone(),
                &message.agent,
                label,
                kind,
                &message.text,
                rationale,
            ))
            .await;
    }
}

/// RFC 3339 instants are taken as-is; offset-less values are read in the window's timezone.
pub fn parse_quote_timestamp(raw: &str, window: &BusinessWindow) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())?;
    match window.timezone().from_local_datetime(&naive) {
        LocalResult::Single(local) => Some(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{parse_quote_timestamp, EngineParts, EscalationEngine, EvaluationOutcome};
    use crate::audit::{DecisionKind, InMemoryDecisionLog};
    use crate::calendar::BusinessWindow;
    use crate::capabilities::{
        InMemoryResponseLog, RecordingDispatcher, ScriptedClassifier, StaticAgentDirectory,
    };
    use crate::dispatch::Delivery;
    use crate::domain::conversation::{AgentContact, ConversationId, InboundMessage};
    use crate::errors::EscalationError;
    use crate::escalation::state::{Threshold, ThresholdSet};
    use crate::escalation::store::AlertStore;
    use crate::intent::IntentGate;
    use crate::templates::MessageTemplates;
    use crate::vocabulary::Vocabulary;
    use crate::watchdog::{ResponseWatchdog, WatchdogSettings};

    struct Harness {
        engine: EscalationEngine,
        dispatcher: RecordingDispatcher,
        classifier: ScriptedClassifier,
        log: InMemoryDecisionLog,
    }

    fn harness_with(classifier: ScriptedClassifier, dispatcher: RecordingDispatcher) -> Harness {
        harness_with_thresholds(classifier, dispatcher, ThresholdSet::default())
    }

    fn harness_with_thresholds(
        classifier: ScriptedClassifier,
        dispatcher: RecordingDispatcher,
        thresholds: ThresholdSet,
    ) -> Harness {
        let window = BusinessWindow::parse(
            "UTC",
            &["mon", "tue", "wed", "thu", "fri"].map(str::to_string),
            8,
            18,
        )
        .expect("window");
        let log = InMemoryDecisionLog::default();
        let store = AlertStore::default();
        let delivery = Delivery::new(Arc::new(dispatcher.clone()), Duration::from_secs(5));
        let templates = Arc::new(MessageTemplates::default());
        let watchdog = ResponseWatchdog::new(
            store.clone(),
            Arc::new(InMemoryResponseLog::default()),
            delivery.clone(),
            Arc::new(log.clone()),
            templates.clone(),
            WatchdogSettings {
                grace: Duration::from_secs(600),
                manager_targets: vec!["managers".to_string()],
                final_threshold: thresholds.final_threshold().clone(),
            },
        );
        let intent = IntentGate::new(
            Vocabulary::default().quote_request,
            Arc::new(classifier.clone()),
            Arc::new(log.clone()),
            Duration::from_secs(5),
        );
        let engine = EscalationEngine::new(EngineParts {
            window,
            thresholds,
            intent,
            store,
            directory: Arc::new(StaticAgentDirectory::new([AgentContact {
                name: "Carla".to_string(),
                contact: "5511999990000".to_string(),
            }])),
            delivery,
            recorder: Arc::new(log.clone()),
            templates,
            watchdog,
        });
        Harness { engine, dispatcher, classifier, log }
    }

    fn harness() -> Harness {
        harness_with(ScriptedClassifier::answering("yes"), RecordingDispatcher::default())
    }

    fn message(agent: &str, text: &str, requested_at: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: ConversationId::from_client_name("Maria Souza"),
            client_name: "Maria Souza".to_string(),
            agent: agent.to_string(),
            text: text.to_string(),
            quote_requested_at: requested_at.to_string(),
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        // March 2026: the 2nd is a Monday.
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).single().expect("valid instant")
    }

    const WAITING: &str = "oi, e o orçamento do pendente?";

    #[tokio::test]
    async fn unrenderable_alert_is_logged_as_a_skipped_dispatch() {
        let thresholds = ThresholdSet::new(vec![
            Threshold::new("6h", 6, "alert_6h"),
            Threshold::new("12h", 12, "missing_template"),
        ])
        .expect("thresholds");
        let h = harness_with_thresholds(
            ScriptedClassifier::answering("yes"),
            RecordingDispatcher::default(),
            thresholds,
        );

        let outcome = h
            .engine
            .evaluate(&message("Carla", WAITING, "2026-03-02T09:00:00Z"), at(3, 14))
            .await
            .expect("evaluation");

        assert!(matches!(
            outcome,
            EvaluationOutcome::ThresholdFired { ref threshold, delivered: false, .. } if threshold == "12h"
        ));
        assert!(h.dispatcher.sent().is_empty());
        assert!(h.log.kinds().contains(&DecisionKind::DispatchSkipped));
    }

    #[tokio::test]
    async fn nine_business_hours_fires_only_the_six_hour_alert() {
        let h = harness();
        let outcome = h
            .engine
            .evaluate(&message("Carla", WAITING, "2026-03-02T09:00:00Z"), at(2, 17))
            .await
            .expect("evaluation");

        // Monday 09:00..17:00 in an 08-18 window.
        assert_eq!(
            outcome,
            EvaluationOutcome::ThresholdFired {
                threshold: "6h".to_string(),
                elapsed_hours: 8,
                delivered: true,
                watchdog_armed: false,
            }
        );
        let sent = h.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "5511999990000");
        assert!(sent[0].text.contains("6 horas"));
    }

    #[test]
    fn monday_nine_to_eighteen_counts_nine_business_hours() {
        let h = harness();
        let window = h.engine.window().clone();
        assert_eq!(crate::calendar::elapsed_business_hours(at(2, 9), at(2, 18), &window), 9);
    }

    #[tokio::test]
    async fn courtesy_reply_fails_the_keyword_gate_without_asking_the_classifier() {
        let h = harness();
        let outcome = h
            .engine
            .evaluate(&message("Carla", "tá bom, obrigado", "2026-03-02T09:00:00Z"), at(3, 12))
            .await
            .expect("evaluation");

        assert!(matches!(outcome, EvaluationOutcome::NotAwaitingQuote { .. }));
        assert!(h.classifier.prompts().is_empty());
        assert!(h.dispatcher.sent().is_empty());
        assert!(h.engine.alert_record(&ConversationId::from_client_name("maria souza")).await.is_none());
        assert_eq!(h.log.kinds(), vec![DecisionKind::IntentEvaluated]);
    }

    #[tokio::test]
    async fn unavailable_classifier_is_treated_as_no() {
        let h = harness_with(ScriptedClassifier::unavailable(), RecordingDispatcher::default());
        let outcome = h
            .engine
            .evaluate(&message("Carla", WAITING, "2026-03-02T09:00:00Z"), at(3, 12))
            .await
            .expect("evaluation");

        assert!(matches!(outcome, EvaluationOutcome::NotAwaitingQuote { .. }));
        assert!(h.dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn late_first_evaluation_fires_the_final_alert_then_the_lower_ones() {
        let h = harness();
        let msg = message("Carla", WAITING, "2026-03-02T08:00:00Z");
        // Monday 08:00 to Thursday 10:00 is 32 business hours.
        let outcome = h.engine.evaluate(&msg, at(5, 10)).await.expect("evaluation");

        assert!(matches!(
            outcome,
            EvaluationOutcome::ThresholdFired { ref threshold, watchdog_armed: true, .. }
                if threshold == "18h"
        ));
        assert_eq!(h.dispatcher.sent().len(), 1);
        let conversation = ConversationId::from_client_name("Maria Souza");
        let record = h.engine.alert_record(&conversation).await.expect("record");
        assert_eq!(record.fired_thresholds.len(), 1);

        // One lower threshold per later evaluation, highest first.
        let mut later = Vec::new();
        for now in [at(5, 11), at(5, 12)] {
            match h.engine.evaluate(&msg, now).await.expect("evaluation") {
                EvaluationOutcome::ThresholdFired { threshold, watchdog_armed, .. } => {
                    assert!(!watchdog_armed);
                    later.push(threshold);
                }
                other => panic!("expected a fire, got {other:?}"),
            }
        }
        assert_eq!(later, vec!["12h".to_string(), "6h".to_string()]);
        assert!(h.engine.watchdog().is_armed(&conversation));

        let done = h.engine.evaluate(&msg, at(5, 13)).await.expect("evaluation");
        assert!(matches!(done, EvaluationOutcome::BelowThreshold { next_threshold: None, .. }));
        assert_eq!(h.dispatcher.sent().len(), 3);
    }

    #[tokio::test]
    async fn thresholds_advance_one_step_per_evaluation() {
        let h = harness();
        let msg = message("Carla", WAITING, "2026-03-02T08:00:00Z");

        let mut fired = Vec::new();
        for now in [at(2, 15), at(2, 16), at(3, 11), at(3, 17)] {
            if let EvaluationOutcome::ThresholdFired { threshold, .. } =
                h.engine.evaluate(&msg, now).await.expect("evaluation")
            {
                fired.push(threshold);
            }
        }
        assert_eq!(fired, vec!["6h".to_string(), "12h".to_string(), "18h".to_string()]);
    }

    #[tokio::test]
    async fn outside_the_window_nothing_is_evaluated_or_mutated() {
        let h = harness();
        let outcome = h
            .engine
            .evaluate(&message("Carla", WAITING, "2026-03-02T08:00:00Z"), at(7, 12))
            .await
            .expect("evaluation");

        assert_eq!(outcome, EvaluationOutcome::OutsideBusinessWindow);
        assert!(h.classifier.prompts().is_empty());
        assert!(h.engine.alert_record(&ConversationId::from_client_name("maria souza")).await.is_none());
    }

    #[tokio::test]
    async fn malformed_timestamp_fails_only_that_evaluation() {
        let h = harness();
        let error = h
            .engine
            .evaluate(&message("Carla", WAITING, "yesterday-ish"), at(3, 12))
            .await
            .expect_err("malformed timestamp");
        assert!(matches!(error, EscalationError::MalformedConversationTimestamp { .. }));

        let ok = h
            .engine
            .evaluate(&message("Carla", WAITING, "2026-03-02 08:00:00"), at(2, 15))
            .await
            .expect("next evaluation is unaffected");
        assert!(ok.is_action());
    }

    #[tokio::test]
    async fn unknown_agent_still_records_the_fire_but_skips_dispatch() {
        let h = harness();
        let outcome = h
            .engine
            .evaluate(&message("Bruno", WAITING, "2026-03-02T08:00:00Z"), at(2, 15))
            .await
            .expect("evaluation");

        assert!(matches!(outcome, EvaluationOutcome::ThresholdFired { delivered: false, .. }));
        assert!(h.dispatcher.sent().is_empty());
        assert!(h.log.kinds().contains(&DecisionKind::DispatchSkipped));
        assert!(h
            .engine
            .alert_record(&ConversationId::from_client_name("maria souza"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_cause_a_refire() {
        let h = harness_with(ScriptedClassifier::answering("sim"), RecordingDispatcher::failing());
        let msg = message("Carla", WAITING, "2026-03-02T08:00:00Z");

        let first = h.engine.evaluate(&msg, at(2, 15)).await.expect("evaluation");
        assert!(matches!(first, EvaluationOutcome::ThresholdFired { delivered: false, .. }));

        let second = h.engine.evaluate(&msg, at(2, 16)).await.expect("evaluation");
        assert!(matches!(second, EvaluationOutcome::BelowThreshold { .. }));
        assert_eq!(h.dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn resolution_drops_the_record_and_cancels_the_watchdog() {
        let h = harness();
        let conversation = ConversationId::from_client_name("Maria Souza");
        h.engine
            .evaluate(&message("Carla", WAITING, "2026-03-02T08:00:00Z"), at(5, 10))
            .await
            .expect("final alert fires");
        assert!(h.engine.watchdog().is_armed(&conversation));

        let resolution = h.engine.resolve(&conversation).await.expect("resolution");
        assert!(resolution.had_record);
        assert!(resolution.watchdog_cancelled);
        assert!(!h.engine.watchdog().is_armed(&conversation));
        assert!(h.engine.alert_record(&conversation).await.is_none());
        assert!(h.log.kinds().contains(&DecisionKind::Resolved));
    }

    #[test]
    fn offsetless_timestamps_are_read_in_the_window_timezone() {
        let window = BusinessWindow::default();
        let parsed = parse_quote_timestamp("2026-03-02 09:00:00", &window).expect("parses");
        // America/Sao_Paulo is UTC-3 in March.
        assert_eq!(parsed, at(2, 12));
        assert!(parse_quote_timestamp("", &window).is_none());
    }
}
