//! Development-history datastore.
//!
//! Holds the corpus that sessions explore: conversations with their turns,
//! and commits with the files they touched. The `SQLite` backend implements
//! both [`SearchBackend`](crate::storage::SearchBackend) and
//! [`ThreadStore`](crate::storage::ThreadStore).
//!
//! The corpus is loaded with `trawl ingest <file.json>` from a
//! [`HistoryDocument`]:
//!
//! ```json
//! {
//!   "conversations": [
//!     { "id": "c1", "scope_id": "acme", "title": "Cache rewrite",
//!       "turns": [ { "role": "user", "content": "Why is redis slow?" } ] }
//!   ],
//!   "commits": [
//!     { "hash": "9f1c2e", "scope_id": "acme", "author": "Dana",
//!       "committed_at": "2024-03-02T10:00:00Z", "subject": "Drop redis",
//!       "files": ["src/cache.rs"], "conversation_id": "c1" }
//!   ]
//! }
//! ```

mod sqlite;

pub use sqlite::SqliteHistoryStore;

use serde::{Deserialize, Serialize};

/// Ingestion document: a batch of conversations and commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// Conversations to upsert.
    #[serde(default)]
    pub conversations: Vec<ConversationRecord>,
    /// Commits to upsert.
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

/// One conversation with its turns in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation identity; becomes the thread id.
    pub id: String,
    /// Project the conversation belongs to.
    pub scope_id: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// RFC 3339 start time.
    #[serde(default)]
    pub started_at: Option<String>,
    /// Turns in order.
    #[serde(default)]
    pub turns: Vec<TurnRecord>,
}

/// One turn as ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Speaker.
    pub role: String,
    /// Text.
    pub content: String,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub occurred_at: Option<String>,
}

/// One commit as ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Full hash.
    pub hash: String,
    /// Project the commit belongs to.
    pub scope_id: String,
    /// Author name and/or email.
    #[serde(default)]
    pub author: String,
    /// RFC 3339 commit time.
    #[serde(default)]
    pub committed_at: Option<String>,
    /// First line of the message.
    #[serde(default)]
    pub subject: String,
    /// Remaining message body.
    #[serde(default)]
    pub message: String,
    /// Paths touched.
    #[serde(default)]
    pub files: Vec<String>,
    /// Conversation that produced the commit, if known.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Counts reported by an ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Conversations written.
    pub conversations: usize,
    /// Turns written.
    pub turns: usize,
    /// Commits written.
    pub commits: usize,
}
