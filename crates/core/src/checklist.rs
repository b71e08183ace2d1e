//! Rule-based completeness checks over accumulated conversation text.
//!
//! Both validators are pure: same text and vocabulary in, same ordered findings out.

use std::sync::Arc;

use serde::Serialize;

use crate::audit::{DecisionKind, DecisionRecord, DecisionRecorder};
use crate::capabilities::AgentDirectory;
use crate::dispatch::Delivery;
use crate::domain::conversation::ConversationId;
use crate::templates::{MessageTemplates, CLOSURE_CHECKLIST, CUSTOM_ORDER_CHECKLIST};
use crate::vocabulary::{matches_any, Vocabulary};

pub const MISSING_IMAGE: &str = "imagem ou foto de referência do produto";
pub const MISSING_COLOR: &str = "cor do acabamento";
pub const MISSING_FIXTURE_TYPE: &str = "tipo de luminária";
pub const MISSING_VOLTAGE: &str = "voltagem (110v/220v)";
pub const MISSING_READINESS_AND_DELIVERY: &str =
    "informação de produção/pronta entrega e de entrega/frete";
pub const MISSING_CLIENT_CONFIRMATION: &str = "confirmação explícita do cliente";
pub const MISSING_LEAD_TIME: &str = "prazo de produção ou disponibilidade";
pub const MISSING_VOLTAGE_CONFIRMATION: &str = "confirmação da voltagem";

/// Findings for closing a catalog sale. Empty means complete.
pub fn closure_findings(text: &str, vocabulary: &Vocabulary) -> Vec<String> {
    let folded = text.to_lowercase();
    let mut findings = Vec::new();

    if !matches_any(&folded, &vocabulary.image_reference) {
        findings.push(MISSING_IMAGE.to_string());
    }
    if !matches_any(&folded, &vocabulary.color) {
        findings.push(MISSING_COLOR.to_string());
    }
    if !matches_any(&folded, &vocabulary.fixture_type) {
        findings.push(MISSING_FIXTURE_TYPE.to_string());
    }
    if !matches_any(&folded, &vocabulary.voltage) {
        findings.push(MISSING_VOLTAGE.to_string());
    }
    let ready = matches_any(&folded, &vocabulary.production_ready);
    let delivery = matches_any(&folded, &vocabulary.delivery);
    if !(ready && delivery) {
        findings.push(MISSING_READINESS_AND_DELIVERY.to_string());
    }
    findings
}

/// A custom order mentions order intent and no catalog code.
pub fn is_custom_order(text: &str, vocabulary: &Vocabulary) -> bool {
    let folded = text.to_lowercase();
    matches_any(&folded, &vocabulary.order_intent) && !matches_any(&folded, &vocabulary.catalog_code)
}

/// Findings for formalizing a non-catalog order. Always empty for catalog orders.
pub fn custom_order_findings(text: &str, vocabulary: &Vocabulary) -> Vec<String> {
    if !is_custom_order(text, vocabulary) {
        return Vec::new();
    }
    let folded = text.to_lowercase();
    let mut findings = Vec::new();

    if !matches_any(&folded, &vocabulary.image_reference) {
        findings.push(MISSING_IMAGE.to_string());
    }
    if !matches_any(&folded, &vocabulary.client_confirmation) {
        findings.push(MISSING_CLIENT_CONFIRMATION.to_string());
    }
    if !matches_any(&folded, &vocabulary.lead_time) {
        findings.push(MISSING_LEAD_TIME.to_string());
    }
    if !matches_any(&folded, &vocabulary.voltage) {
        findings.push(MISSING_VOLTAGE_CONFIRMATION.to_string());
    }
    findings
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChecklistReport {
    pub closure: Vec<String>,
    pub custom_order_active: bool,
    pub custom_order: Vec<String>,
}

impl ChecklistReport {
    pub fn evaluate(text: &str, vocabulary: &Vocabulary) -> Self {
        Self {
            closure: closure_findings(text, vocabulary),
            custom_order_active: is_custom_order(text, vocabulary),
            custom_order: custom_order_findings(text, vocabulary),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.closure.is_empty() && self.custom_order.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChecklistRun {
    pub report: ChecklistReport,
    /// Findings messages the gateway accepted.
    pub messages_sent: usize,
    pub dispatch_skipped: bool,
}

/// Runs both validators and sends one consolidated message per non-empty finding list.
pub struct ChecklistRunner {
    vocabulary: Vocabulary,
    directory: Arc<dyn AgentDirectory>,
    delivery: Delivery,
    recorder: Arc<dyn DecisionRecorder>,
    templates: Arc<MessageTemplates>,
}

impl ChecklistRunner {
    pub fn new(
        vocabulary: Vocabulary,
        directory: Arc<dyn AgentDirectory>,
        delivery: Delivery,
        recorder: Arc<dyn DecisionRecorder>,
        templates: Arc<MessageTemplates>,
    ) -> Self {
        Self { vocabulary, directory, delivery, recorder, templates }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub async fn run(
        &self,
        conversation_id: &ConversationId,
        agent: &str,
        client_name: &str,
        text: &str,
    ) -> ChecklistRun {
        let report = ChecklistReport::evaluate(text, &self.vocabulary);
        if report.is_complete() {
            tracing::debug!(
                event_name = "checklist.complete",
                conversation_id = %conversation_id,
                "no checklist findings"
            );
            return ChecklistRun { report, messages_sent: 0, dispatch_skipped: false };
        }

        let contact = self.directory.resolve(agent).await;
        if contact.is_none() {
            tracing::warn!(
                event_name = "checklist.dispatch_skipped",
                conversation_id = %conversation_id,
                agent,
                "no contact mapping for agent; findings not dispatched"
            );
        }

        let mut messages_sent = 0;
        for (template, label, findings) in [
            (CLOSURE_CHECKLIST, "checklist.closure", &report.closure),
            (CUSTOM_ORDER_CHECKLIST, "checklist.custom_order", &report.custom_order),
        ] {
            if findings.is_empty() {
                continue;
            }
            let mut delivered = false;
            if let Some(contact) = &contact {
                match self.templates.render_findings(template, &contact.name, client_name, findings)
                {
                    Ok(message) => {
                        delivered = self
                            .delivery
                            .deliver(conversation_id, &contact.contact, &message)
                            .await
                            .is_ok();
                        if delivered {
                            messages_sent += 1;
                        }
                    }
                    Err(error) => tracing::error!(
                        event_name = "checklist.template_failed",
                        conversation_id = %conversation_id,
                        template,
                        error = %error,
                        "checklist template failed to render"
                    ),
                }
            }

            self.recorder
                .record(
                    DecisionRecord::new(
                        conversation_id.clone(),
                        agent,
                        label,
                        DecisionKind::ChecklistFindings,
                        text,
                        format!("{} missing item(s)", findings.len()),
                    )
                    .with_extra("findings", findings.join("; "))
                    .with_extra("delivered", delivered.to_string()),
                )
                .await;
        }

        ChecklistRun { report, messages_sent, dispatch_skipped: contact.is_none() }
    }
}
