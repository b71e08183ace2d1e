pub mod audit;
pub mod calendar;
pub mod capabilities;
pub mod checklist;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod intent;
pub mod templates;
pub mod vocabulary;
pub mod watchdog;

pub use audit::{
    DecisionKind, DecisionRecord, DecisionRecorder, InMemoryDecisionLog, TracingDecisionRecorder,
};
pub use calendar::{elapsed_business_hours, is_within_business_window, BusinessWindow};
pub use capabilities::{
    AgentDirectory, NotificationDispatcher, ResponseObserver, StaticAgentDirectory,
    YesNoClassifier,
};
pub use checklist::{
    closure_findings, custom_order_findings, ChecklistReport, ChecklistRun, ChecklistRunner,
};
pub use dispatch::Delivery;
pub use domain::{AgentContact, AgentResponse, ConversationId, InboundMessage};
pub use errors::{ApplicationError, EscalationError, InterfaceError};
pub use escalation::{
    AlertPersistence, AlertRecord, AlertStore, EngineParts, EscalationEngine, EscalationState,
    EvaluationOutcome, ResolutionOutcome, Threshold, ThresholdSet,
};
pub use intent::{IntentGate, IntentVerdict};
pub use templates::MessageTemplates;
pub use vocabulary::Vocabulary;
pub use watchdog::{ResponseWatchdog, WatchdogSettings};
