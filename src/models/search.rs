//! Discovery search types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::EventId;

/// What kind of lead a search request follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadKind {
    /// The user's own question (iteration 0).
    Initial,
    /// A commit hash or prefix.
    Commit,
    /// A named entity (component, library, concept).
    Entity,
    /// A person (commit author).
    Person,
    /// A date or date range.
    Date,
    /// A file path.
    File,
    /// A specific conversation.
    Conversation,
}

impl LeadKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Commit => "commit",
            Self::Entity => "entity",
            Self::Person => "person",
            Self::Date => "date",
            Self::File => "file",
            Self::Conversation => "conversation",
        }
    }

    /// Parses a lead kind, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "initial" => Some(Self::Initial),
            "commit" => Some(Self::Commit),
            "entity" => Some(Self::Entity),
            "person" | "author" => Some(Self::Person),
            "date" => Some(Self::Date),
            "file" | "path" => Some(Self::File),
            "conversation" | "thread" => Some(Self::Conversation),
            _ => None,
        }
    }
}

impl fmt::Display for LeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured restrictions attached to a search request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Commit hash or unique prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Author name or email fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// File path or path fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Restrict to one conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl SearchFilters {
    /// Creates an empty filter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            commit_hash: None,
            author: None,
            since: None,
            until: None,
            file_path: None,
            conversation_id: None,
        }
    }

    /// Derives filters from a lead's kind and value.
    ///
    /// Date values are either a single day (`2024-03-01`) or a range
    /// (`2024-03-01..2024-03-15`).
    #[must_use]
    pub fn for_lead(kind: LeadKind, value: &str) -> Self {
        let value = value.trim();
        let mut filters = Self::new();
        if value.is_empty() {
            return filters;
        }
        match kind {
            LeadKind::Commit => filters.commit_hash = Some(value.to_string()),
            LeadKind::Person => filters.author = Some(value.to_string()),
            LeadKind::File => filters.file_path = Some(value.to_string()),
            LeadKind::Conversation => filters.conversation_id = Some(value.to_string()),
            LeadKind::Date => {
                let (since, until) = value
                    .split_once("..")
                    .map_or((value, value), |(a, b)| (a.trim(), b.trim()));
                if !since.is_empty() {
                    filters.since = Some(since.to_string());
                }
                if !until.is_empty() {
                    filters.until = Some(until.to_string());
                }
            },
            LeadKind::Initial | LeadKind::Entity => {},
        }
        filters
    }

    /// Returns true if no restriction is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.commit_hash.is_none()
            && self.author.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.file_path.is_none()
            && self.conversation_id.is_none()
    }
}

/// A search to run in some iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query_text: String,
    /// Iteration in which the search runs.
    pub iteration: u32,
    /// Event that produced the request (none for the session seed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_event_id: Option<EventId>,
    /// Lead type, selects the query strategy.
    pub lead_kind: LeadKind,
    /// Structured restrictions.
    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    /// Builds the iteration-0 request for a user query.
    #[must_use]
    pub fn initial(query: impl Into<String>) -> Self {
        Self {
            query_text: query.into(),
            iteration: 0,
            origin_event_id: None,
            lead_kind: LeadKind::Initial,
            filters: SearchFilters::new(),
        }
    }
}

/// Kind of evidence a discovered item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// One turn of a conversation.
    Turn,
    /// A commit.
    Commit,
}

/// A candidate unit of evidence returned by the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredItem {
    /// Stable identity (`turn:<conversation>:<index>`, `commit:<hash>`).
    pub id: String,
    /// Conversation the evidence belongs to.
    pub thread_id: String,
    /// Evidence type.
    pub kind: ItemKind,
    /// Short title (conversation title, commit subject).
    pub title: String,
    /// Content excerpt used for judging.
    pub content: String,
    /// Backend relevance hint in `[0, 1]`.
    pub relevance_hint: f32,
    /// When the evidence was produced, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
}

/// Counts-and-ids summary carried by a `search_complete` event.
///
/// The items themselves are stored as a blob under [`SearchSummary::RESULTS_BLOB`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSummary {
    /// Iteration the search ran in.
    pub iteration: u32,
    /// Lead type of the request.
    pub lead_kind: LeadKind,
    /// Items the backend returned.
    pub returned: usize,
    /// Items dropped as already seen this session.
    pub duplicates: usize,
    /// Identities of the surviving items.
    pub item_ids: Vec<String>,
}

impl SearchSummary {
    /// Blob name under which surviving items are stored.
    pub const RESULTS_BLOB: &'static str = "results";
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(LeadKind::Commit, "abc123", |f: &SearchFilters| f.commit_hash.as_deref() == Some("abc123"); "commit")]
    #[test_case(LeadKind::Person, "alice", |f: &SearchFilters| f.author.as_deref() == Some("alice"); "person")]
    #[test_case(LeadKind::File, "src/db.rs", |f: &SearchFilters| f.file_path.as_deref() == Some("src/db.rs"); "file")]
    #[test_case(LeadKind::Conversation, "conv-9", |f: &SearchFilters| f.conversation_id.as_deref() == Some("conv-9"); "conversation")]
    #[test_case(LeadKind::Entity, "redis", SearchFilters::is_empty; "entity")]
    fn test_filters_for_lead(kind: LeadKind, value: &str, check: fn(&SearchFilters) -> bool) {
        assert!(check(&SearchFilters::for_lead(kind, value)));
    }

    #[test]
    fn test_filters_for_date_range() {
        let single = SearchFilters::for_lead(LeadKind::Date, "2024-03-01");
        assert_eq!(single.since.as_deref(), Some("2024-03-01"));
        assert_eq!(single.until.as_deref(), Some("2024-03-01"));

        let range = SearchFilters::for_lead(LeadKind::Date, "2024-03-01 .. 2024-03-15");
        assert_eq!(range.since.as_deref(), Some("2024-03-01"));
        assert_eq!(range.until.as_deref(), Some("2024-03-15"));

        let open = SearchFilters::for_lead(LeadKind::Date, "..2024-03-15");
        assert!(open.since.is_none());
        assert_eq!(open.until.as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn test_lead_kind_parse_aliases() {
        assert_eq!(LeadKind::parse("Author"), Some(LeadKind::Person));
        assert_eq!(LeadKind::parse(" path "), Some(LeadKind::File));
        assert_eq!(LeadKind::parse("thread"), Some(LeadKind::Conversation));
        assert_eq!(LeadKind::parse("ticket"), None);
    }

    #[test]
    fn test_initial_request() {
        let request = SearchRequest::initial("why sqlite?");
        assert_eq!(request.iteration, 0);
        assert_eq!(request.lead_kind, LeadKind::Initial);
        assert!(request.origin_event_id.is_none());
        assert!(request.filters.is_empty());
    }
}
