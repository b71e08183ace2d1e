use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable key for one client service episode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Derives the key from a client display name: trimmed, lowercased and with
    /// internal whitespace collapsed, so "  Maria  Souza" and "maria souza" match.
    pub fn from_client_name(name: &str) -> Self {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContact {
    pub name: String,
    /// Phone number or group identifier understood by the notification gateway.
    pub contact: String,
}

/// A client message that may indicate the client is waiting on a quote.
///
/// `quote_requested_at` is kept as the raw wire value; it is parsed during evaluation so a
/// malformed timestamp fails that single evaluation only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub client_name: String,
    pub agent: String,
    pub text: String,
    pub quote_requested_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub conversation_id: ConversationId,
    pub agent: String,
    pub text: String,
    pub responded_at: DateTime<Utc>,
}
