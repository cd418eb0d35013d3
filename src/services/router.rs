//! Discovery search routing.
//!
//! Each pending `request_search` event is dispatched to a lead-specific query
//! against the search backend. Survivors of session-wide deduplication are
//! stored as one blob; the `search_complete` event carries counts and ids.

use super::queue::PendingSearch;
use crate::models::{
    Action, DiscoveredItem, ErrorPayload, EventDraft, EventId, LeadKind, Phase, SearchFilters,
    SearchRequest, SearchSummary,
};
use crate::storage::sqlite::acquire_lock;
use crate::storage::{BlobStore, EventLog, SearchBackend, put_json};
use crate::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::info_span;

/// Producer name for router events.
pub const ROUTER_PRODUCER: &str = "router";

/// The backend query a request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Free text passed to the backend (may be empty for structured routes).
    pub query_text: String,
    /// Filters passed to the backend.
    pub filters: SearchFilters,
}

/// Resolves a request to its backend query.
///
/// Structured lead kinds keep only their own filter and fall back to the
/// query text when the filter value is missing. Text kinds drop structured
/// filters; `conversation` keeps its conversation scope.
#[must_use]
pub fn route(request: &SearchRequest) -> Route {
    let text = request.query_text.trim().to_string();
    let given = &request.filters;
    let or_text = |value: &Option<String>| {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| (!text.is_empty()).then(|| text.clone()))
    };

    let mut filters = SearchFilters::new();
    match request.lead_kind {
        LeadKind::Commit => filters.commit_hash = or_text(&given.commit_hash),
        LeadKind::Person => filters.author = or_text(&given.author),
        LeadKind::File => filters.file_path = or_text(&given.file_path),
        LeadKind::Date => {
            filters.since.clone_from(&given.since);
            filters.until.clone_from(&given.until);
        },
        LeadKind::Conversation => filters.conversation_id.clone_from(&given.conversation_id),
        LeadKind::Initial | LeadKind::Entity => {},
    }
    Route {
        query_text: text,
        filters,
    }
}

/// Result of executing one pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedSearch {
    /// The `request_search` event that was resolved.
    pub request_event: EventId,
    /// The `search_complete` (or `error`) event that resolved it.
    pub event_id: EventId,
    /// New items, never seen earlier in the session.
    pub items: Vec<DiscoveredItem>,
    /// True if the backend call failed.
    pub failed: bool,
}

/// Executes search requests for one session.
///
/// The set of already-returned item ids lives in this struct only. It is not
/// written to the log, so a second router over the same session would
/// surface duplicates again.
pub struct DiscoverySearchRouter {
    backend: Arc<dyn SearchBackend>,
    scope_id: String,
    limit: usize,
    seen: Mutex<HashSet<String>>,
}

impl DiscoverySearchRouter {
    /// Creates a router for one session scope.
    #[must_use]
    pub fn new(backend: Arc<dyn SearchBackend>, scope_id: impl Into<String>, limit: usize) -> Self {
        Self {
            backend,
            scope_id: scope_id.into(),
            limit,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Number of distinct items returned so far.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        acquire_lock(&self.seen).len()
    }

    /// Keeps the items whose ids have not been returned before, in order.
    fn admit_unseen(&self, items: Vec<DiscoveredItem>) -> Vec<DiscoveredItem> {
        let mut seen = acquire_lock(&self.seen);
        items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect()
    }

    /// Runs one pending request and records its outcome.
    ///
    /// A search backend failure is recorded as a search-phase `error` event
    /// that resolves the request with zero results.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] only if the log or blob store fails.
    pub fn execute(
        &self,
        log: &dyn EventLog,
        blobs: &dyn BlobStore,
        pending: &PendingSearch,
    ) -> Result<RoutedSearch> {
        let request = &pending.request;
        let span = info_span!(
            "router.search",
            request = %pending.event_id,
            lead_kind = request.lead_kind.as_str(),
            iteration = request.iteration
        );
        let _enter = span.enter();

        let route = route(request);
        let searched =
            self.backend
                .search(&route.query_text, &self.scope_id, &route.filters, self.limit);
        let returned = match searched {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Search failed, resolving request with no results");
                metrics::counter!(
                    "trawl_search_failures_total",
                    "lead_kind" => request.lead_kind.as_str()
                )
                .increment(1);
                let event_id = log.append(
                    EventDraft::new(ROUTER_PRODUCER, Phase::Search, Action::Error)
                        .with_payload(&ErrorPayload::new("search", &e))?
                        .caused_by(pending.event_id),
                )?;
                return Ok(RoutedSearch {
                    request_event: pending.event_id,
                    event_id,
                    items: Vec::new(),
                    failed: true,
                });
            },
        };

        let returned_count = returned.len();
        let items = self.admit_unseen(returned);
        let summary = SearchSummary {
            iteration: request.iteration,
            lead_kind: request.lead_kind,
            returned: returned_count,
            duplicates: returned_count - items.len(),
            item_ids: items.iter().map(|i| i.id.clone()).collect(),
        };

        let mut draft = EventDraft::new(ROUTER_PRODUCER, Phase::Search, Action::SearchComplete)
            .with_payload(&summary)?
            .caused_by(pending.event_id);
        if !items.is_empty() {
            draft = draft.with_blob(
                SearchSummary::RESULTS_BLOB,
                put_json(blobs, SearchSummary::RESULTS_BLOB, &items)?,
            );
        }
        let event_id = log.append(draft)?;

        metrics::counter!(
            "trawl_search_items_total",
            "lead_kind" => request.lead_kind.as_str()
        )
        .increment(items.len() as u64);
        tracing::info!(
            returned = returned_count,
            new = items.len(),
            duplicates = summary.duplicates,
            "Search complete"
        );

        Ok(RoutedSearch {
            request_event: pending.event_id,
            event_id,
            items,
            failed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKind, SearchRequestPayload, SessionId};
    use crate::services::queue::{pending_searches, search_results};
    use crate::storage::{EventFilter, InMemoryBlobStore, InMemoryEventLog};
    use crate::Error;

    struct FixedBackend {
        ids: Vec<&'static str>,
        fail: bool,
        calls: Mutex<Vec<(String, SearchFilters)>>,
    }

    impl SearchBackend for FixedBackend {
        fn search(
            &self,
            query_text: &str,
            _scope_id: &str,
            filters: &SearchFilters,
            limit: usize,
        ) -> Result<Vec<DiscoveredItem>> {
            acquire_lock(&self.calls).push((query_text.to_string(), filters.clone()));
            if self.fail {
                return Err(Error::collaborator("search", "index offline"));
            }
            Ok(self
                .ids
                .iter()
                .take(limit)
                .map(|id| DiscoveredItem {
                    id: (*id).to_string(),
                    thread_id: "c1".to_string(),
                    kind: ItemKind::Turn,
                    title: "t".to_string(),
                    content: "c".to_string(),
                    relevance_hint: 0.5,
                    occurred_at: None,
                })
                .collect())
        }
    }

    fn backend(ids: Vec<&'static str>, fail: bool) -> Arc<FixedBackend> {
        Arc::new(FixedBackend {
            ids,
            fail,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn seed(log: &dyn EventLog, request: SearchRequest) -> PendingSearch {
        let event_id = log
            .append(
                EventDraft::new("seed", Phase::Seeding, Action::RequestSearch)
                    .with_payload(&SearchRequestPayload {
                        request: request.clone(),
                        lead: None,
                    })
                    .unwrap(),
            )
            .unwrap();
        PendingSearch { event_id, request }
    }

    #[test]
    fn test_route_structured_kinds() {
        let mut request = SearchRequest::initial("who touched the pool");
        request.lead_kind = LeadKind::Person;
        assert_eq!(
            route(&request).filters.author.as_deref(),
            Some("who touched the pool")
        );

        request.filters.author = Some("alice".to_string());
        request.filters.file_path = Some("src/pool.rs".to_string());
        let routed = route(&request);
        assert_eq!(routed.filters.author.as_deref(), Some("alice"));
        assert!(routed.filters.file_path.is_none());

        request.lead_kind = LeadKind::Entity;
        assert!(route(&request).filters.is_empty());

        request.lead_kind = LeadKind::Conversation;
        request.filters.conversation_id = Some("conv-7".to_string());
        assert_eq!(
            route(&request).filters.conversation_id.as_deref(),
            Some("conv-7")
        );
    }

    #[test]
    fn test_execute_dedups_across_requests() {
        let log = InMemoryEventLog::new(SessionId::new("s"));
        let blobs = InMemoryBlobStore::new();
        let router = DiscoverySearchRouter::new(backend(vec!["a", "b", "a"], false), "proj", 10);

        let first = router
            .execute(&log, &blobs, &seed(&log, SearchRequest::initial("q1")))
            .unwrap();
        assert_eq!(first.items.len(), 2);

        let second = router
            .execute(&log, &blobs, &seed(&log, SearchRequest::initial("q2")))
            .unwrap();
        assert!(second.items.is_empty());
        assert_eq!(router.seen_count(), 2);

        let events = log.read(&EventFilter::actions(&[Action::SearchComplete])).unwrap();
        assert_eq!(events.len(), 2);
        let summary: SearchSummary = events[0].decode().unwrap();
        assert_eq!(summary.returned, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(search_results(&blobs, &events[0]).unwrap().len(), 2);
        assert!(events[1].blob(SearchSummary::RESULTS_BLOB).is_none());
        assert!(pending_searches(&log).unwrap().is_empty());
    }

    #[test]
    fn test_backend_failure_resolves_request() {
        let log = InMemoryEventLog::new(SessionId::new("s"));
        let blobs = InMemoryBlobStore::new();
        let router = DiscoverySearchRouter::new(backend(vec!["a"], true), "proj", 10);

        let pending = seed(&log, SearchRequest::initial("q"));
        let routed = router.execute(&log, &blobs, &pending).unwrap();

        assert!(routed.failed);
        assert!(routed.items.is_empty());
        let errors = log.read(&EventFilter::actions(&[Action::Error])).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].references(pending.event_id));
        let payload: ErrorPayload = errors[0].decode().unwrap();
        assert_eq!(payload.result_count, 0);
        assert!(pending_searches(&log).unwrap().is_empty());
    }
}
