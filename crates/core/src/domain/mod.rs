pub mod conversation;

pub use conversation::{AgentContact, AgentResponse, ConversationId, InboundMessage};
