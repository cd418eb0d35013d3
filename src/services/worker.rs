//! Worker pool: claim queued items, investigate their threads, emit findings
//! and leads.
//!
//! Claiming is read-scan-then-append. Two workers that scan before either
//! appends can claim the same item and investigate it twice; the duplicate
//! findings are tolerated downstream. The start stagger makes this rare.

use super::queue::{next_claim, peer_findings, unclaimed_work};
use crate::config::ExplorationConfig;
use crate::llm::{Collaborator, TurnAnalysisRequest};
use crate::models::{
    Action, ClaimPayload, ErrorPayload, EventDraft, EventId, FindingPayload, Lead,
    LeadAttribution, LeadKind, LeadPriority, Phase, SearchRequestPayload, Turn, WorkItem,
    WorkOutcome, WorkStatus,
};
use crate::storage::sqlite::acquire_lock;
use crate::storage::{BlobStore, EventLog, ThreadStore, put_json};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info_span;

/// Blob name for investigated transcripts.
pub const TRANSCRIPT_BLOB: &str = "transcript";

/// Everything a worker needs, shared by all workers of one pool.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    /// Session log.
    pub log: &'a dyn EventLog,
    /// Session blobs.
    pub blobs: &'a dyn BlobStore,
    /// Conversation datastore.
    pub threads: &'a dyn ThreadStore,
    /// Reasoning collaborator.
    pub collaborator: &'a dyn Collaborator,
    /// The user's question.
    pub query: &'a str,
    /// Current iteration; leads are requested for the next one.
    pub iteration: u32,
    /// Leads already requested in this session.
    pub leads: &'a LeadMemo,
    /// Tuning.
    pub config: &'a ExplorationConfig,
}

/// Counters for one worker or a whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Items claimed.
    pub claimed: usize,
    /// Items investigated to the end.
    pub completed: usize,
    /// Items abandoned on a collaborator error.
    pub failed: usize,
    /// Findings emitted.
    pub findings: usize,
    /// Search requests emitted.
    pub leads: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: Self) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.failed += other.failed;
        self.findings += other.findings;
        self.leads += other.leads;
    }
}

/// Picks the leads to forward from one turn.
///
/// Keeps `high` leads with a non-empty query that `memo` has not seen, up to
/// `cap`. Forwarded leads are added to `memo`.
pub fn select_leads(
    leads: Vec<Lead>,
    memo: &mut HashSet<(LeadKind, String)>,
    cap: usize,
) -> Vec<Lead> {
    let mut selected = Vec::new();
    for lead in leads {
        if selected.len() >= cap {
            break;
        }
        if lead.priority != LeadPriority::High || lead.search_query_text.trim().is_empty() {
            continue;
        }
        if memo.insert(lead.memo_key()) {
            selected.push(lead);
        }
    }
    selected
}

/// `(kind, query_text)` pairs forwarded so far in one session.
///
/// Owned by the session, so a lead forwarded in one iteration is not
/// requested again by a later pool. Process-local; never written to the log.
#[derive(Debug, Default)]
pub struct LeadMemo {
    requested: Mutex<HashSet<(LeadKind, String)>>,
}

impl LeadMemo {
    /// Creates an empty memo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct leads forwarded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.requested).len()
    }

    /// True if no lead has been forwarded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`select_leads`] against the session's memo.
    pub fn select(&self, leads: Vec<Lead>, cap: usize) -> Vec<Lead> {
        let mut requested = acquire_lock(&self.requested);
        select_leads(leads, &mut requested, cap)
    }
}

/// Number of workers to start for `unclaimed` queued items.
#[must_use]
pub fn pool_size(unclaimed: usize, max_workers: usize) -> usize {
    unclaimed.min(max_workers)
}

/// Producer name of worker `index` in `iteration`'s pool.
#[must_use]
pub fn worker_name(iteration: u32, index: usize) -> String {
    format!("worker-{iteration}-{index}")
}

/// One worker.
pub struct Worker<'a> {
    name: String,
    ctx: WorkerContext<'a>,
}

impl<'a> Worker<'a> {
    /// Creates a worker.
    #[must_use]
    pub fn new(name: impl Into<String>, ctx: WorkerContext<'a>) -> Self {
        Self {
            name: name.into(),
            ctx,
        }
    }

    /// Claims and investigates items until none are left.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the log, blob store or thread datastore
    /// fails. Collaborator failures are recorded and the worker moves on.
    pub fn run(&self) -> Result<WorkerStats> {
        let span = info_span!("worker", worker = %self.name, iteration = self.ctx.iteration);
        let _enter = span.enter();

        let mut stats = WorkerStats::default();
        while let Some((claim_event, item)) = self.claim()? {
            stats.claimed += 1;
            let outcome = self.investigate(claim_event, &item)?;
            match outcome.status {
                WorkStatus::Completed => stats.completed += 1,
                WorkStatus::Failed => stats.failed += 1,
            }
            stats.findings += outcome.findings;
            stats.leads += outcome.leads;
        }
        tracing::debug!(claimed = stats.claimed, "Worker exiting, queue drained");
        Ok(stats)
    }

    /// Claims the best unclaimed item, if any.
    fn claim(&self) -> Result<Option<(EventId, WorkItem)>> {
        let Some(queued) = next_claim(self.ctx.log)? else {
            return Ok(None);
        };
        let payload = ClaimPayload {
            item_id: queued.item.item_id.clone(),
            thread_id: queued.item.thread_id.clone(),
            queue_event_id: queued.event_id,
            worker: self.name.clone(),
        };
        let claim_event = self.ctx.log.append(
            EventDraft::new(&self.name, Phase::Work, Action::ClaimWork)
                .with_payload(&payload)?
                .caused_by(queued.event_id),
        )?;
        tracing::info!(
            item = %queued.item.item_id,
            priority = queued.item.priority,
            "Claimed work item"
        );
        Ok(Some((claim_event, queued.item)))
    }

    fn record_failure(&self, claim_event: EventId, item: &WorkItem, error: &Error) -> Result<()> {
        tracing::warn!(item = %item.item_id, error = %error, "Investigation failed");
        metrics::counter!("trawl_investigation_failures_total").increment(1);
        self.ctx.log.append(
            EventDraft::new(&self.name, Phase::Work, Action::Error)
                .with_payload(&ErrorPayload::new("investigate", error).for_item(&item.item_id))?
                .caused_by(claim_event),
        )?;
        Ok(())
    }

    /// Walks the item's thread turn by turn.
    fn investigate(&self, claim_event: EventId, item: &WorkItem) -> Result<WorkOutcome> {
        let mut outcome = WorkOutcome {
            item_id: item.item_id.clone(),
            status: WorkStatus::Completed,
            turns_analyzed: 0,
            findings: 0,
            leads: 0,
        };

        let mut completion = EventDraft::new(&self.name, Phase::Work, Action::WorkComplete)
            .caused_by(claim_event);
        match self.ctx.threads.full_thread(&item.thread_id) {
            Ok(turns) => {
                let transcript = put_json(self.ctx.blobs, TRANSCRIPT_BLOB, &turns)?;
                completion = completion.with_blob(TRANSCRIPT_BLOB, transcript);
                for (index, turn) in turns.iter().enumerate() {
                    let prior = &turns[..index];
                    if let Err(e) = self.analyze(claim_event, item, turn, prior, &mut outcome) {
                        if e.is_backend() {
                            return Err(e);
                        }
                        self.record_failure(claim_event, item, &e)?;
                        outcome.status = WorkStatus::Failed;
                        break;
                    }
                    outcome.turns_analyzed += 1;
                }
            },
            Err(e) if e.is_backend() => return Err(e),
            Err(e) => {
                self.record_failure(claim_event, item, &e)?;
                outcome.status = WorkStatus::Failed;
            },
        }

        self.ctx.log.append(completion.with_payload(&outcome)?)?;
        Ok(outcome)
    }

    /// Analyzes one turn, emitting findings and leads as they arrive.
    fn analyze(
        &self,
        claim_event: EventId,
        item: &WorkItem,
        turn: &Turn,
        prior_turns: &[Turn],
        outcome: &mut WorkOutcome,
    ) -> Result<()> {
        let peers = peer_findings(self.ctx.log, &self.name, self.ctx.config.finding_window)?;
        let analysis = self.ctx.collaborator.analyze_turn(&TurnAnalysisRequest {
            query: self.ctx.query,
            turn,
            prior_turns,
            peer_findings: &peers,
        })?;

        for finding in analysis.findings {
            let mut finding = finding.normalized();
            finding.source_item_id.clone_from(&item.item_id);
            let payload = FindingPayload {
                finding,
                turn_index: turn.index,
                thread_id: turn.thread_id.clone(),
            };
            self.ctx.log.append(
                EventDraft::new(&self.name, Phase::Work, Action::Finding)
                    .with_payload(&payload)?
                    .caused_by(claim_event),
            )?;
            outcome.findings += 1;
            metrics::counter!("trawl_findings_total").increment(1);
        }

        let leads = self
            .ctx
            .leads
            .select(analysis.leads, self.ctx.config.max_leads_per_turn);
        for lead in leads {
            let attribution = LeadAttribution {
                item_id: item.item_id.clone(),
                turn_index: turn.index,
                priority: lead.priority,
                rationale: lead.rationale.clone(),
            };
            tracing::debug!(kind = lead.kind.as_str(), query = %lead.search_query_text, "Forwarding lead");
            let payload = SearchRequestPayload {
                request: lead.into_request(self.ctx.iteration + 1, claim_event),
                lead: Some(attribution),
            };
            self.ctx.log.append(
                EventDraft::new(&self.name, Phase::Work, Action::RequestSearch)
                    .with_payload(&payload)?
                    .caused_by(claim_event),
            )?;
            outcome.leads += 1;
        }
        Ok(())
    }
}

/// A bounded, staggered set of workers draining the queue.
pub struct WorkerPool<'a> {
    ctx: WorkerContext<'a>,
}

impl<'a> WorkerPool<'a> {
    /// Creates a pool.
    #[must_use]
    pub const fn new(ctx: WorkerContext<'a>) -> Self {
        Self { ctx }
    }

    /// Starts `min(unclaimed, max_workers)` workers and waits for all of them.
    ///
    /// Returns the number of workers started and their combined counters.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Backend`] any worker hit.
    pub fn run(&self) -> Result<(usize, WorkerStats)> {
        let size = pool_size(
            unclaimed_work(self.ctx.log)?.len(),
            self.ctx.config.max_workers,
        );
        if size == 0 {
            return Ok((0, WorkerStats::default()));
        }
        tracing::info!(workers = size, iteration = self.ctx.iteration, "Starting worker pool");

        let stagger = self.ctx.config.worker_stagger();
        let results: Vec<Result<WorkerStats>> = std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(size);
            for index in 0..size {
                if index > 0 && !stagger.is_zero() {
                    std::thread::sleep(stagger);
                }
                let worker = Worker::new(worker_name(self.ctx.iteration, index), self.ctx);
                handles.push(s.spawn(move || worker.run()));
            }
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(Error::OperationFailed {
                            operation: "worker".to_string(),
                            cause: "worker thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        let mut total = WorkerStats::default();
        for result in results {
            total.merge(result?);
        }
        Ok((size, total))
    }
}
