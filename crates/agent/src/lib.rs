//! LLM access for quotewatch.
//!
//! The model only answers the yes/no "is this customer still waiting for a quote?" question.
//! Every escalation decision stays deterministic in `quotewatch-core`.

pub mod classifier;
pub mod llm;

pub use classifier::LlmYesNoClassifier;
pub use llm::{HttpLlmClient, LlmClient, LlmError};
