//! Loop manager: drives search, gate and worker rounds until nothing is
//! pending or the iteration cap is reached.
//!
//! ```text
//! Seeding ──▶ Iterating(0) ──▶ Iterating(1) ──▶ … ──┬──▶ Converged
//!                                                  ├──▶ MaxIterationsReached
//!                                                  └──▶ Stopped
//! ```
//!
//! The iteration index is read from the pending requests themselves, so a
//! loop resumed over an existing log picks up where it left off.

use super::gate::{Candidate, RelevanceGate};
use super::queue::pending_searches;
use super::router::DiscoverySearchRouter;
use super::worker::{LeadMemo, WorkerContext, WorkerPool};
use crate::config::ExplorationConfig;
use crate::llm::Collaborator;
use crate::storage::{BlobStore, EventLog, ThreadStore};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info_span;

/// Loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "iteration")]
pub enum LoopState {
    /// The session's seed request is being written.
    Seeding,
    /// Running the given iteration.
    Iterating(u32),
    /// No search requests are pending.
    Converged,
    /// Requests remain but the iteration cap was reached.
    MaxIterationsReached,
    /// A stop was requested between iterations.
    Stopped,
}

impl LoopState {
    /// Returns true for the terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::MaxIterationsReached | Self::Stopped
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seeding => f.write_str("seeding"),
            Self::Iterating(i) => write!(f, "iterating({i})"),
            Self::Converged => f.write_str("converged"),
            Self::MaxIterationsReached => f.write_str("max_iterations_reached"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Counters for one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Iteration index.
    pub iteration: u32,
    /// Search requests executed.
    pub searches: usize,
    /// Searches that failed.
    pub failed_searches: usize,
    /// New items discovered.
    pub new_items: usize,
    /// Judges spawned.
    pub judges: usize,
    /// Items admitted to the queue.
    pub admitted: usize,
    /// Workers started.
    pub workers: usize,
    /// Items claimed.
    pub claimed: usize,
    /// Findings emitted.
    pub findings: usize,
    /// Search requests emitted for the next iteration.
    pub leads: usize,
}

/// Result of running the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Terminal state.
    pub state: LoopState,
    /// Iterations executed by this run.
    pub iterations: u32,
    /// Per-iteration counters.
    pub reports: Vec<IterationReport>,
}

/// Drives one session's iterations.
pub struct LoopManager<'a> {
    /// Session log.
    pub log: &'a dyn EventLog,
    /// Session blobs.
    pub blobs: &'a dyn BlobStore,
    /// Session router (owns the dedup set).
    pub router: &'a DiscoverySearchRouter,
    /// Leads already requested in this session.
    pub leads: &'a LeadMemo,
    /// Conversation datastore.
    pub threads: &'a dyn ThreadStore,
    /// Reasoning collaborator.
    pub collaborator: &'a dyn Collaborator,
    /// The user's question.
    pub query: &'a str,
    /// Tuning.
    pub config: &'a ExplorationConfig,
    /// Checked between iterations.
    pub stop: &'a AtomicBool,
}

impl LoopManager<'_> {
    /// Runs iterations until a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the log, blob store or thread
    /// datastore fails. Collaborator failures never end the loop.
    pub fn run(&self) -> Result<LoopOutcome> {
        let mut reports = Vec::new();
        let state = loop {
            if self.stop.load(Ordering::SeqCst) {
                break LoopState::Stopped;
            }
            let pending = pending_searches(self.log)?;
            let Some(iteration) = pending.iter().map(|p| p.request.iteration).min() else {
                break LoopState::Converged;
            };
            if iteration >= self.config.max_iterations {
                break LoopState::MaxIterationsReached;
            }
            reports.push(self.iterate(iteration, &pending)?);
        };

        #[allow(clippy::cast_possible_truncation)]
        let iterations = reports.len() as u32;
        tracing::info!(state = %state, iterations, "Exploration loop finished");
        Ok(LoopOutcome {
            state,
            iterations,
            reports,
        })
    }

    fn iterate(
        &self,
        iteration: u32,
        pending: &[super::queue::PendingSearch],
    ) -> Result<IterationReport> {
        let span = info_span!("iteration", state = %LoopState::Iterating(iteration));
        let _enter = span.enter();
        let mut report = IterationReport {
            iteration,
            searches: pending.len(),
            ..IterationReport::default()
        };

        let mut candidates = Vec::new();
        for request in pending {
            let routed = self.router.execute(self.log, self.blobs, request)?;
            if routed.failed {
                report.failed_searches += 1;
            }
            candidates.extend(routed.items.into_iter().map(|item| Candidate {
                item,
                origin: routed.event_id,
            }));
        }
        report.new_items = candidates.len();

        let gate = RelevanceGate::new(
            self.collaborator,
            self.config.admission_threshold,
            self.config.judge_batch_size,
            self.config.max_judges,
        );
        let gated = gate.run(self.log, self.query, iteration, &candidates)?;
        report.judges = gated.judges;
        report.admitted = gated.admitted;

        let pool = WorkerPool::new(WorkerContext {
            log: self.log,
            blobs: self.blobs,
            threads: self.threads,
            collaborator: self.collaborator,
            query: self.query,
            iteration,
            leads: self.leads,
            config: self.config,
        });
        let (workers, stats) = pool.run()?;
        report.workers = workers;
        report.claimed = stats.claimed;
        report.findings = stats.findings;
        report.leads = stats.leads;

        metrics::counter!("trawl_iterations_total").increment(1);
        tracing::info!(
            searches = report.searches,
            new_items = report.new_items,
            admitted = report.admitted,
            workers = report.workers,
            leads = report.leads,
            "Iteration complete"
        );
        Ok(report)
    }
}
