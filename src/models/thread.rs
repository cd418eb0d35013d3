//! Conversation threads as returned by the thread datastore.

use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Conversation the turn belongs to.
    pub thread_id: String,
    /// Zero-based position in the conversation.
    pub index: usize,
    /// Speaker (`user`, `assistant`, `tool`).
    pub role: String,
    /// Turn text.
    pub content: String,
    /// RFC 3339 timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
}

/// Payload of the `session_started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The user's question.
    pub query: String,
    /// Corpus scope (project identifier).
    pub scope_id: String,
}
