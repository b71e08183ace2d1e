pub mod engine;
pub mod state;
pub mod store;

pub use engine::{
    parse_quote_timestamp, EngineParts, EscalationEngine, EvaluationOutcome, ResolutionOutcome,
};
pub use state::{AlertRecord, EscalationState, Threshold, ThresholdError, ThresholdSet};
pub use store::{AlertPersistence, AlertStore, FireDecision, ManagerMark, NoopAlertPersistence};
