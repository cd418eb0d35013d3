//! Findings and leads produced by investigation.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{LeadKind, SearchFilters, SearchRequest};

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// A choice that was made.
    Decision,
    /// Something that went wrong.
    Problem,
    /// How a problem was resolved.
    Solution,
    /// An implementation detail.
    TechnicalDetail,
    /// Background information.
    Context,
}

impl FindingKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Problem => "problem",
            Self::Solution => "solution",
            Self::TechnicalDetail => "technical_detail",
            Self::Context => "context",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of evidence extracted from one conversation turn.
///
/// Findings are append-only. Corrections arrive as new findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Category.
    pub kind: FindingKind,
    /// One-line summary.
    pub summary: String,
    /// Supporting detail.
    #[serde(default)]
    pub detail: String,
    /// Entities mentioned (files, components, people).
    #[serde(default)]
    pub related_entities: Vec<String>,
    /// Item whose investigation produced the finding.
    #[serde(default)]
    pub source_item_id: String,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f32,
}

impl Finding {
    /// Clamps confidence into `[0, 1]`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

/// Urgency of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadPriority {
    /// Worth a search in the next iteration.
    High,
    /// Informational.
    #[default]
    Medium,
    /// Informational.
    Low,
}

/// A hint that should trigger a new search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    /// Lead type.
    pub kind: LeadKind,
    /// Structured value (hash, author, path, date range, conversation id).
    #[serde(default)]
    pub value: String,
    /// Free-text query to run.
    pub search_query_text: String,
    /// Why the lead matters.
    #[serde(default)]
    pub rationale: String,
    /// Urgency.
    #[serde(default)]
    pub priority: LeadPriority,
}

impl Lead {
    /// Memo key used to suppress repeated requests.
    #[must_use]
    pub fn memo_key(&self) -> (LeadKind, String) {
        (self.kind, self.search_query_text.trim().to_lowercase())
    }

    /// Converts the lead into a search request for `iteration`.
    #[must_use]
    pub fn into_request(self, iteration: u32, origin: super::EventId) -> SearchRequest {
        let filters = SearchFilters::for_lead(self.kind, &self.value);
        SearchRequest {
            query_text: self.search_query_text,
            iteration,
            origin_event_id: Some(origin),
            lead_kind: self.kind,
            filters,
        }
    }
}

/// Turn attribution carried by `request_search` events that came from leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadAttribution {
    /// Investigated item.
    pub item_id: String,
    /// Turn index within the item's thread.
    pub turn_index: usize,
    /// Lead urgency (always `high` for forwarded leads).
    pub priority: LeadPriority,
    /// Lead rationale.
    #[serde(default)]
    pub rationale: String,
}

/// Payload of a `request_search` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequestPayload {
    /// The request.
    pub request: SearchRequest,
    /// Present when the request came from a worker's lead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<LeadAttribution>,
}

/// Payload of a `finding` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingPayload {
    /// The finding.
    pub finding: Finding,
    /// Turn index that produced it.
    pub turn_index: usize,
    /// Thread investigated.
    pub thread_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventId;

    #[test]
    fn test_finding_confidence_clamped() {
        let finding = Finding {
            kind: FindingKind::Decision,
            summary: "s".to_string(),
            detail: String::new(),
            related_entities: vec![],
            source_item_id: "i".to_string(),
            confidence: 1.7,
        };
        assert!((finding.normalized().confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_lead_parses_with_defaults() {
        let lead: Lead =
            serde_json::from_str(r#"{"kind":"file","search_query_text":"pool config"}"#).unwrap();
        assert_eq!(lead.priority, LeadPriority::Medium);
        assert!(lead.value.is_empty());
    }

    #[test]
    fn test_lead_into_request() {
        let lead = Lead {
            kind: LeadKind::Commit,
            value: "9f3c2ab".to_string(),
            search_query_text: "switch to sqlite".to_string(),
            rationale: "commit mentioned".to_string(),
            priority: LeadPriority::High,
        };
        assert_eq!(lead.memo_key(), (LeadKind::Commit, "switch to sqlite".to_string()));

        let request = lead.into_request(2, EventId::new(11));
        assert_eq!(request.iteration, 2);
        assert_eq!(request.origin_event_id, Some(EventId::new(11)));
        assert_eq!(request.filters.commit_hash.as_deref(), Some("9f3c2ab"));
    }
}
