//! Relevance gate: concurrent judges that admit items into the work queue.

use crate::llm::Collaborator;
use crate::models::{
    Action, DiscoveredItem, ErrorPayload, EventDraft, EventId, JudgeReport, JudgeVerdict, Phase,
    WorkItem,
};
use crate::storage::EventLog;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::info_span;

/// A discovered item together with the `search_complete` event that surfaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The item.
    pub item: DiscoveredItem,
    /// Its `search_complete` event.
    pub origin: EventId,
}

/// Summary of one gate run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateOutcome {
    /// Judges spawned.
    pub judges: usize,
    /// Judges whose batch failed.
    pub failed_judges: usize,
    /// Items appended as `add_to_queue`.
    pub admitted: usize,
}

/// Number of judges for `n` items: `ceil(n / batch_size)`, at most `max_judges`.
#[must_use]
pub fn judge_count(n: usize, batch_size: usize, max_judges: usize) -> usize {
    n.div_ceil(batch_size.max(1)).min(max_judges.max(1))
}

/// Splits `items` into `parts` contiguous batches whose sizes differ by at
/// most one. Earlier batches take the remainder.
#[must_use]
pub fn split_even<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    if items.is_empty() || parts == 0 {
        return Vec::new();
    }
    let parts = parts.min(items.len());
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut batches = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        batches.push(&items[start..start + len]);
        start += len;
    }
    batches
}

/// Checks that `verdicts` hold exactly one in-range verdict per item.
///
/// # Errors
///
/// Returns [`Error::Collaborator`] describing the first violation.
pub fn validate_verdicts(batch: &[Candidate], verdicts: &[JudgeVerdict]) -> Result<()> {
    let reject = |cause: String| Err(Error::collaborator("score_items", cause));
    if verdicts.len() != batch.len() {
        return reject(format!(
            "expected {} verdicts, got {}",
            batch.len(),
            verdicts.len()
        ));
    }
    let expected: HashSet<&str> = batch.iter().map(|c| c.item.id.as_str()).collect();
    let mut seen = HashSet::new();
    for verdict in verdicts {
        if !expected.contains(verdict.item_id.as_str()) {
            return reject(format!("verdict for unknown item '{}'", verdict.item_id));
        }
        if !seen.insert(verdict.item_id.as_str()) {
            return reject(format!("duplicate verdict for '{}'", verdict.item_id));
        }
        if !verdict.is_in_range() {
            return reject(format!(
                "score {} for '{}' outside [0, 10]",
                verdict.score, verdict.item_id
            ));
        }
    }
    Ok(())
}

/// Spawns judges over newly discovered items and admits the relevant ones.
pub struct RelevanceGate<'a> {
    collaborator: &'a dyn Collaborator,
    threshold: f32,
    batch_size: usize,
    max_judges: usize,
}

impl<'a> RelevanceGate<'a> {
    /// Creates a gate.
    #[must_use]
    pub const fn new(
        collaborator: &'a dyn Collaborator,
        threshold: f32,
        batch_size: usize,
        max_judges: usize,
    ) -> Self {
        Self {
            collaborator,
            threshold,
            batch_size,
            max_judges,
        }
    }

    /// Judges `candidates` for `query` and enqueues admitted items.
    ///
    /// Judges run concurrently. A judge whose collaborator call fails or
    /// whose reply is malformed records an `error` event and admits nothing;
    /// its siblings are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if appending to the log fails.
    pub fn run(
        &self,
        log: &dyn EventLog,
        query: &str,
        iteration: u32,
        candidates: &[Candidate],
    ) -> Result<GateOutcome> {
        let judges = judge_count(candidates.len(), self.batch_size, self.max_judges);
        if judges == 0 {
            return Ok(GateOutcome::default());
        }
        let batches = split_even(candidates, judges);
        tracing::info!(
            items = candidates.len(),
            judges = batches.len(),
            iteration,
            "Spawning judges"
        );

        let results: Vec<Result<Option<usize>>> = std::thread::scope(|s| {
            let handles: Vec<_> = batches
                .iter()
                .enumerate()
                .map(|(index, batch)| {
                    s.spawn(move || self.judge(log, query, iteration, index, batch))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(Error::OperationFailed {
                            operation: "judge".to_string(),
                            cause: "judge thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        let mut outcome = GateOutcome {
            judges: batches.len(),
            ..GateOutcome::default()
        };
        for result in results {
            match result? {
                Some(admitted) => outcome.admitted += admitted,
                None => outcome.failed_judges += 1,
            }
        }
        Ok(outcome)
    }

    /// Runs one judge. Returns `Ok(None)` if the judge failed locally.
    fn judge(
        &self,
        log: &dyn EventLog,
        query: &str,
        iteration: u32,
        index: usize,
        batch: &[Candidate],
    ) -> Result<Option<usize>> {
        let producer = format!("judge-{index}");
        let span = info_span!("judge", judge = %producer, batch = batch.len());
        let _enter = span.enter();

        let mut origins: Vec<EventId> = batch.iter().map(|c| c.origin).collect();
        origins.sort_unstable();
        origins.dedup();

        let items: Vec<DiscoveredItem> = batch.iter().map(|c| c.item.clone()).collect();
        let verdicts = match self
            .collaborator
            .score_items(query, &items)
            .and_then(|verdicts| validate_verdicts(batch, &verdicts).map(|()| verdicts))
        {
            Ok(verdicts) => verdicts,
            Err(e) if e.is_backend() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Judge failed");
                metrics::counter!("trawl_judge_failures_total").increment(1);
                let mut draft = EventDraft::new(&producer, Phase::Judge, Action::Error)
                    .with_payload(&ErrorPayload::new("judge", &e))?;
                for origin in &origins {
                    draft = draft.caused_by(*origin);
                }
                log.append(draft)?;
                return Ok(None);
            },
        };

        let admitted: Vec<&JudgeVerdict> = verdicts
            .iter()
            .filter(|v| v.score >= self.threshold)
            .collect();
        let report = JudgeReport {
            iteration,
            judge: index,
            verdicts: verdicts.clone(),
            admitted: admitted.len(),
        };
        let mut draft = EventDraft::new(&producer, Phase::Judge, Action::JudgeComplete)
            .with_payload(&report)?;
        for origin in &origins {
            draft = draft.caused_by(*origin);
        }
        let judge_event = log.append(draft)?;

        let by_id: HashMap<&str, &Candidate> =
            batch.iter().map(|c| (c.item.id.as_str(), c)).collect();
        for verdict in &admitted {
            let Some(candidate) = by_id.get(verdict.item_id.as_str()) else {
                continue;
            };
            let work = WorkItem {
                item_id: candidate.item.id.clone(),
                thread_id: candidate.item.thread_id.clone(),
                priority: verdict.score,
                origin_event_id: candidate.origin,
                iteration,
                claimed: false,
            };
            log.append(
                EventDraft::new(&producer, Phase::Judge, Action::AddToQueue)
                    .with_payload(&work)?
                    .caused_by(judge_event)
                    .caused_by(candidate.origin),
            )?;
        }

        metrics::counter!("trawl_items_admitted_total").increment(admitted.len() as u64);
        tracing::debug!(admitted = admitted.len(), "Judge complete");
        Ok(Some(admitted.len()))
    }
}
