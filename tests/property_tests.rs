//! Property-based tests for batching and derived log views.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Judge batches cover every item once and differ in size by at most one
//! - Judge count never exceeds its cap
//! - The claim queue is ordered by priority, then by append order
//! - A request is pending until something resolves it

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_precision_loss)]

use proptest::prelude::*;
use trawl::models::{SearchRequestPayload, SessionId, WorkItem};
use trawl::services::queue::{pending_searches, unclaimed_work};
use trawl::services::{judge_count, split_even};
use trawl::storage::InMemoryEventLog;
use trawl::{Action, EventDraft, EventId, EventLog, Phase, SearchRequest};

proptest! {
    /// Property: batches partition the input in order.
    #[test]
    fn prop_split_even_partitions(len in 0usize..200, parts in 1usize..20) {
        let items: Vec<usize> = (0..len).collect();
        let batches = split_even(&items, parts);

        let flattened: Vec<usize> = batches.iter().flat_map(|b| b.iter().copied()).collect();
        prop_assert_eq!(&flattened, &items);
        prop_assert!(batches.iter().all(|b| !b.is_empty()));
        prop_assert_eq!(batches.len(), parts.min(len));
    }

    /// Property: batch sizes differ by at most one, larger batches first.
    #[test]
    fn prop_split_even_balanced(len in 1usize..200, parts in 1usize..20) {
        let items: Vec<usize> = (0..len).collect();
        let sizes: Vec<usize> = split_even(&items, parts).iter().map(|b| b.len()).collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }

    /// Property: judge count is ceil(n / batch) capped at `max`.
    #[test]
    fn prop_judge_count_bounded(n in 0usize..5000, batch in 1usize..50, max in 1usize..32) {
        let judges = judge_count(n, batch, max);
        prop_assert!(judges <= max);
        prop_assert_eq!(judges == 0, n == 0);
        if n > 0 && n.div_ceil(batch) <= max {
            prop_assert_eq!(judges, n.div_ceil(batch));
        }
    }

    /// Property: the queue yields higher priorities first, ties by event id.
    #[test]
    fn prop_claim_order(priorities in prop::collection::vec(0u8..=10, 1..40)) {
        let log = InMemoryEventLog::new(SessionId::new("prop"));
        for (i, priority) in priorities.iter().enumerate() {
            log.append(
                EventDraft::new("judge-0", Phase::Judge, Action::AddToQueue)
                    .with_payload(&WorkItem {
                        item_id: format!("item-{i}"),
                        thread_id: format!("thread-{i}"),
                        priority: f32::from(*priority),
                        origin_event_id: EventId::new(1),
                        iteration: 0,
                        claimed: false,
                    })
                    .unwrap(),
            )
            .unwrap();
        }

        let queue = unclaimed_work(&log).unwrap();
        prop_assert_eq!(queue.len(), priorities.len());
        for pair in queue.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.item.priority > b.item.priority
                    || (a.item.priority == b.item.priority && a.event_id < b.event_id)
            );
        }
    }

    /// Property: only resolved requests leave the pending set.
    #[test]
    fn prop_pending_until_resolved(resolved in prop::collection::vec(any::<bool>(), 1..30)) {
        let log = InMemoryEventLog::new(SessionId::new("prop"));
        let mut requests = Vec::new();
        for i in 0..resolved.len() {
            let id = log
                .append(
                    EventDraft::new("session", Phase::Seeding, Action::RequestSearch)
                        .with_payload(&SearchRequestPayload {
                            request: SearchRequest::initial(format!("q{i}")),
                            lead: None,
                        })
                        .unwrap(),
                )
                .unwrap();
            requests.push(id);
        }
        for (id, done) in requests.iter().zip(&resolved) {
            if *done {
                log.append(
                    EventDraft::new("router", Phase::Search, Action::SearchComplete).caused_by(*id),
                )
                .unwrap();
            }
        }

        let pending: Vec<EventId> = pending_searches(&log)
            .unwrap()
            .into_iter()
            .map(|p| p.event_id)
            .collect();
        let expected: Vec<EventId> = requests
            .iter()
            .zip(&resolved)
            .filter(|(_, done)| !**done)
            .map(|(id, _)| *id)
            .collect();
        prop_assert_eq!(pending, expected);
    }
}
