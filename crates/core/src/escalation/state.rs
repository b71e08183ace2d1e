use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::ConversationId;
use crate::templates::{ALERT_12H, ALERT_6H, ALERT_FINAL};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub label: String,
    pub hours_required: u64,
    pub template_id: String,
}

impl Threshold {
    pub fn new(label: impl Into<String>, hours_required: u64, template_id: impl Into<String>) -> Self {
        Self { label: label.into(), hours_required, template_id: template_id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("at least one threshold is required")]
    Empty,
    #[error("threshold `{label}` ({hours}h) must require more hours than the one before it")]
    NotIncreasing { label: String, hours: u64 },
    #[error("threshold label `{0}` is used twice")]
    DuplicateLabel(String),
}

/// Thresholds ordered by strictly increasing `hours_required`. The last one is final.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    pub fn new(thresholds: Vec<Threshold>) -> Result<Self, ThresholdError> {
        if thresholds.is_empty() {
            return Err(ThresholdError::Empty);
        }
        let mut labels = BTreeSet::new();
        for (index, threshold) in thresholds.iter().enumerate() {
            if !labels.insert(threshold.label.clone()) {
                return Err(ThresholdError::DuplicateLabel(threshold.label.clone()));
            }
            if index > 0 && threshold.hours_required <= thresholds[index - 1].hours_required {
                return Err(ThresholdError::NotIncreasing {
                    label: threshold.label.clone(),
                    hours: threshold.hours_required,
                });
            }
        }
        Ok(Self { thresholds })
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn final_threshold(&self) -> &Threshold {
        // Construction guarantees at least one element.
        &self.thresholds[self.thresholds.len() - 1]
    }

    pub fn is_final(&self, threshold: &Threshold) -> bool {
        self.final_threshold().label == threshold.label
    }

    /// Picks the threshold one evaluation may fire: scanning from highest to lowest, the
    /// first one whose requirement is met and whose label has not fired yet.
    ///
    /// A late first evaluation at 20h fires 18h; the next evaluation fires 12h, then 6h.
    pub fn eligible(&self, fired: &BTreeSet<String>, elapsed_hours: u64) -> Option<&Threshold> {
        self.thresholds.iter().rev().find(|threshold| {
            threshold.hours_required <= elapsed_hours && !fired.contains(&threshold.label)
        })
    }

    /// The next threshold above `elapsed_hours`, if any.
    pub fn next_above(&self, elapsed_hours: u64) -> Option<&Threshold> {
        self.thresholds.iter().find(|threshold| threshold.hours_required > elapsed_hours)
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            thresholds: vec![
                Threshold::new("6h", 6, ALERT_6H),
                Threshold::new("12h", 12, ALERT_12H),
                Threshold::new("18h", 18, ALERT_FINAL),
            ],
        }
    }
}

/// Per-conversation escalation bookkeeping. `fired_thresholds` only grows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub conversation_id: ConversationId,
    pub assigned_agent: String,
    pub client_name: String,
    pub fired_thresholds: BTreeSet<String>,
    pub manager_escalated: bool,
    /// When the final threshold fired; the manager watchdog resumes from here after restart.
    #[serde(default)]
    pub final_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn new(
        conversation_id: ConversationId,
        assigned_agent: impl Into<String>,
        client_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id,
            assigned_agent: assigned_agent.into(),
            client_name: client_name.into(),
            fired_thresholds: BTreeSet::new(),
            manager_escalated: false,
            final_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self, thresholds: &ThresholdSet) -> EscalationState {
        if self.manager_escalated {
            return EscalationState::ManagerEscalated;
        }
        thresholds
            .iter()
            .rev()
            .find(|threshold| self.fired_thresholds.contains(&threshold.label))
            .map(|threshold| EscalationState::Alerted(threshold.label.clone()))
            .unwrap_or(EscalationState::WaitingConfirmed)
    }
}

/// `Quiet → WaitingConfirmed → Alerted(6h) → Alerted(12h) → Alerted(18h) → ManagerEscalated`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Quiet,
    WaitingConfirmed,
    Alerted(String),
    ManagerEscalated,
}
