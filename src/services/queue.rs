//! Views derived from a session's event log.
//!
//! Nothing in this module caches. Every function rescans [`EventLog::read`]
//! output, so any component can rebuild authoritative state from the log
//! alone and no view can go stale between calls.

use crate::models::{
    Action, ClaimPayload, DiscoveredItem, Event, EventId, Finding, FindingPayload, Phase,
    SearchRequest, SearchRequestPayload, SearchSummary, WorkItem,
};
use crate::storage::{BlobStore, EventFilter, EventLog, get_json};
use crate::Result;
use std::cmp::Ordering;
use std::collections::HashSet;

/// An `add_to_queue` event that no claim has consumed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWork {
    /// The `add_to_queue` event.
    pub event_id: EventId,
    /// The queued item.
    pub item: WorkItem,
}

/// A `request_search` event with no `search_complete` or router error yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSearch {
    /// The `request_search` event.
    pub event_id: EventId,
    /// The decoded request.
    pub request: SearchRequest,
}

/// Orders queued work for claiming: highest priority first, then arrival.
fn claim_order(a: &QueuedWork, b: &QueuedWork) -> Ordering {
    b.item
        .priority
        .total_cmp(&a.item.priority)
        .then(a.event_id.cmp(&b.event_id))
}

/// Returns every unclaimed work item in claim order.
///
/// An item is claimed once any `claim_work` event names its item id or its
/// thread id; one claim per thread covers every item queued for it.
///
/// # Errors
///
/// Returns [`crate::Error::Backend`] if the log cannot be read or holds a
/// malformed payload.
pub fn unclaimed_work(log: &dyn EventLog) -> Result<Vec<QueuedWork>> {
    let events = log.read(&EventFilter::actions(&[
        Action::AddToQueue,
        Action::ClaimWork,
    ]))?;

    let mut claimed_items = HashSet::new();
    let mut claimed_threads = HashSet::new();
    for event in events.iter().filter(|e| e.action == Action::ClaimWork) {
        let claim: ClaimPayload = event.decode()?;
        claimed_items.insert(claim.item_id);
        claimed_threads.insert(claim.thread_id);
    }

    let mut queue = Vec::new();
    for event in events.iter().filter(|e| e.action == Action::AddToQueue) {
        let item: WorkItem = event.decode()?;
        if claimed_items.contains(&item.item_id) || claimed_threads.contains(&item.thread_id) {
            continue;
        }
        queue.push(QueuedWork {
            event_id: event.id,
            item,
        });
    }
    queue.sort_by(claim_order);
    Ok(queue)
}

/// Returns the item the next claim should take, if any.
///
/// # Errors
///
/// Returns [`crate::Error::Backend`] if the log cannot be read.
pub fn next_claim(log: &dyn EventLog) -> Result<Option<QueuedWork>> {
    Ok(unclaimed_work(log)?.into_iter().next())
}

/// Returns the search requests that are still waiting to run, oldest first.
///
/// A request is resolved once a `search_complete` event or a search-phase
/// `error` event lists it in its causal references.
///
/// # Errors
///
/// Returns [`crate::Error::Backend`] if the log cannot be read.
pub fn pending_searches(log: &dyn EventLog) -> Result<Vec<PendingSearch>> {
    let events = log.read(&EventFilter::actions(&[
        Action::RequestSearch,
        Action::SearchComplete,
        Action::Error,
    ]))?;

    let resolved: HashSet<EventId> = events
        .iter()
        .filter(|e| {
            e.action == Action::SearchComplete
                || (e.action == Action::Error && e.phase == Phase::Search)
        })
        .flat_map(|e| e.causal_refs.iter().copied())
        .collect();

    events
        .iter()
        .filter(|e| e.action == Action::RequestSearch && !resolved.contains(&e.id))
        .map(|e| {
            let payload: SearchRequestPayload = e.decode()?;
            Ok(PendingSearch {
                event_id: e.id,
                request: payload.request,
            })
        })
        .collect()
}

/// Returns findings appended after `after` (all findings when `None`).
///
/// # Errors
///
/// Returns [`crate::Error::Backend`] if the log cannot be read.
pub fn findings_after(log: &dyn EventLog, after: Option<EventId>) -> Result<Vec<(EventId, Finding)>> {
    let mut filter = EventFilter::actions(&[Action::Finding]);
    if let Some(after) = after {
        filter = filter.with_after(after);
    }
    log.read(&filter)?
        .iter()
        .map(|e| decode_finding(e).map(|f| (e.id, f)))
        .collect()
}

/// Returns up to `window` of the most recent findings not emitted by
/// `producer`, oldest first. Worker names carry their iteration, so a
/// slot's own findings from earlier pools count as peers.
///
/// # Errors
///
/// Returns [`crate::Error::Backend`] if the log cannot be read.
pub fn peer_findings(log: &dyn EventLog, producer: &str, window: usize) -> Result<Vec<Finding>> {
    if window == 0 {
        return Ok(Vec::new());
    }
    let events = log.read(&EventFilter::actions(&[Action::Finding]))?;
    let mut recent: Vec<Finding> = events
        .iter()
        .rev()
        .filter(|e| e.producer != producer)
        .take(window)
        .map(decode_finding)
        .collect::<Result<_>>()?;
    recent.reverse();
    Ok(recent)
}

fn decode_finding(event: &Event) -> Result<Finding> {
    event.decode::<FindingPayload>().map(|p| p.finding)
}

/// Loads the items stored behind a `search_complete` event.
///
/// Events without a results blob (zero survivors) yield an empty list.
///
/// # Errors
///
/// Returns [`crate::Error::NotFound`] if the blob is missing or
/// [`crate::Error::Backend`] if it cannot be decoded.
pub fn search_results(blobs: &dyn BlobStore, event: &Event) -> Result<Vec<DiscoveredItem>> {
    match event.blob(SearchSummary::RESULTS_BLOB) {
        Some(key) => get_json(blobs, key),
        None => Ok(Vec::new()),
    }
}
