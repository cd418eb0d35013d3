//! Benchmarks for views derived from the session log.
//!
//! Every claim and every loop iteration re-derives the queue and the pending
//! searches from the full log, so these scans bound how large a session can
//! grow before coordination dominates.
//!
//! Benchmark targets:
//! - 1,000 events: <1ms
//! - 10,000 events: <10ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use trawl::models::{ClaimPayload, SearchRequestPayload, SessionId, WorkItem};
use trawl::services::queue::{pending_searches, unclaimed_work};
use trawl::storage::{InMemoryEventLog, SqliteEventLog};
use trawl::{Action, EventDraft, EventId, EventLog, Phase, SearchRequest};

// ============================================================================
// Helper Functions
// ============================================================================

/// Appends `items` queue entries, claims every other one, and adds a
/// resolved and an unresolved search request per ten items.
fn populate(log: &dyn EventLog, items: usize) {
    for i in 0..items {
        let queued = log
            .append(
                EventDraft::new("judge-0", Phase::Judge, Action::AddToQueue)
                    .with_payload(&WorkItem {
                        item_id: format!("item-{i}"),
                        thread_id: format!("thread-{i}"),
                        priority: (i % 11) as f32,
                        origin_event_id: EventId::new(1),
                        iteration: 0,
                        claimed: false,
                    })
                    .unwrap(),
            )
            .unwrap();
        if i % 2 == 0 {
            log.append(
                EventDraft::new("worker-0", Phase::Work, Action::ClaimWork)
                    .with_payload(&ClaimPayload {
                        item_id: format!("item-{i}"),
                        thread_id: format!("thread-{i}"),
                        queue_event_id: queued,
                        worker: "worker-0".to_string(),
                    })
                    .unwrap()
                    .caused_by(queued),
            )
            .unwrap();
        }
        if i % 10 == 0 {
            for resolved in [true, false] {
                let request = log
                    .append(
                        EventDraft::new("worker-0", Phase::Work, Action::RequestSearch)
                            .with_payload(&SearchRequestPayload {
                                request: SearchRequest::initial(format!("lead {i}")),
                                lead: None,
                            })
                            .unwrap(),
                    )
                    .unwrap();
                if resolved {
                    log.append(
                        EventDraft::new("router", Phase::Search, Action::SearchComplete)
                            .caused_by(request),
                    )
                    .unwrap();
                }
            }
        }
    }
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_unclaimed_work(c: &mut Criterion) {
    let mut group = c.benchmark_group("unclaimed_work");
    for items in [500, 5_000] {
        let memory = InMemoryEventLog::new(SessionId::new("bench"));
        populate(&memory, items);
        group.bench_with_input(BenchmarkId::new("memory", items), &memory, |b, log| {
            b.iter(|| black_box(unclaimed_work(log).unwrap()));
        });

        let sqlite = SqliteEventLog::in_memory(SessionId::new("bench")).unwrap();
        populate(&sqlite, items);
        group.bench_with_input(BenchmarkId::new("sqlite", items), &sqlite, |b, log| {
            b.iter(|| black_box(unclaimed_work(log).unwrap()));
        });
    }
    group.finish();
}

fn bench_pending_searches(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_searches");
    for items in [500, 5_000] {
        let memory = InMemoryEventLog::new(SessionId::new("bench"));
        populate(&memory, items);
        group.bench_with_input(BenchmarkId::new("memory", items), &memory, |b, log| {
            b.iter(|| black_box(pending_searches(log).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_unclaimed_work, bench_pending_searches);
criterion_main!(benches);
