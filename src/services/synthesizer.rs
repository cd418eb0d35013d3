//! Incremental answer synthesis.
//!
//! The synthesizer tails the session log on its own schedule, independent of
//! loop iterations. Each tick folds findings appended since its cursor into
//! the running draft. Drafts and final answers are stored as blobs; the log
//! only records that they changed.

use super::queue::findings_after;
use crate::llm::{Collaborator, FinalizeRequest, SynthesisRequest};
use crate::models::{Action, ErrorPayload, EventDraft, EventId, Finding, FindingPayload, Phase};
use crate::storage::sqlite::acquire_lock;
use crate::storage::{BlobStore, EventFilter, EventLog, put_text};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Producer name for synthesizer events.
pub const SYNTHESIZER_PRODUCER: &str = "synthesizer";

/// Blob name for drafts.
pub const DRAFT_BLOB: &str = "draft";

/// Blob name for final answers.
pub const ANSWER_BLOB: &str = "answer";

/// Answer returned when a session produced no findings at all.
pub const NOTHING_FOUND: &str = "No relevant information was found in the development history \
for this question. Try rephrasing it, widening the scope, or naming a specific file, commit or \
person.";

/// Payload of a `synthesis_update` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisUpdate {
    /// Findings folded in by this update.
    pub folded: usize,
    /// Findings seen so far.
    pub total_findings: usize,
}

/// Payload of a `finalized` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedPayload {
    /// Findings seen over the whole session.
    pub total_findings: usize,
    /// True if the collaborator's finalize call failed and the last draft
    /// was used instead.
    pub fallback: bool,
}

#[derive(Debug, Default)]
struct SynthesisState {
    cursor: Option<EventId>,
    draft: Option<String>,
    /// Findings whose synthesis call failed, retried on the next tick.
    carried: Vec<Finding>,
    total_findings: usize,
    answer: Option<String>,
}

struct Ticker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Maintains the running answer for one session.
///
/// Ticks are serialized by `tick_lock`. The state lock is only held to copy
/// values in or out, never across a collaborator call, so
/// [`IncrementalSynthesizer::current_answer`] never waits on the model.
pub struct IncrementalSynthesizer {
    log: Arc<dyn EventLog>,
    blobs: Arc<dyn BlobStore>,
    collaborator: Arc<dyn Collaborator>,
    query: String,
    tick_lock: Mutex<()>,
    state: RwLock<SynthesisState>,
    ticker: Mutex<Option<Ticker>>,
}

impl IncrementalSynthesizer {
    /// Creates a synthesizer with its cursor at the start of the log.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        blobs: Arc<dyn BlobStore>,
        collaborator: Arc<dyn Collaborator>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            log,
            blobs,
            collaborator,
            query: query.into(),
            tick_lock: Mutex::new(()),
            state: RwLock::new(SynthesisState::default()),
            ticker: Mutex::new(None),
        }
    }

    /// Starts the periodic ticker thread.
    ///
    /// The thread holds only a weak reference and exits once the synthesizer
    /// is stopped, finalized or dropped. Calling this twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the thread cannot be spawned.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut ticker = acquire_lock(&self.ticker);
        if ticker.is_some() {
            return Ok(());
        }
        let (stop, stopped) = mpsc::channel::<()>();
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("trawl-synthesizer".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(synthesizer) = weak.upgrade() else {
                        break;
                    };
                    if let Err(e) = synthesizer.tick() {
                        tracing::error!(error = %e, "Synthesis tick failed");
                    }
                }
            })
            .map_err(|e| Error::OperationFailed {
                operation: "spawn_synthesizer".to_string(),
                cause: e.to_string(),
            })?;
        *ticker = Some(Ticker { stop, handle });
        Ok(())
    }

    /// Stops the ticker and waits for an in-flight tick to finish.
    pub fn stop(&self) {
        let ticker = acquire_lock(&self.ticker).take();
        if let Some(ticker) = ticker {
            let _ = ticker.stop.send(());
            // The last strong reference can be dropped by the ticker itself.
            if ticker.handle.thread().id() != std::thread::current().id() {
                let _ = ticker.handle.join();
            }
        }
    }

    /// Returns the latest answer without blocking on the collaborator.
    ///
    /// This is the final answer once [`Self::finalize`] has run, otherwise
    /// the current draft (or `None` before the first successful tick).
    #[must_use]
    pub fn current_answer(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.answer.clone().or_else(|| state.draft.clone())
    }

    /// Number of findings seen so far.
    #[must_use]
    pub fn total_findings(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total_findings
    }

    /// Folds findings appended since the cursor into the draft.
    ///
    /// Returns true if the draft changed. A failed synthesis call is recorded
    /// as an `error` event and its findings are retried on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the log or blob store fails.
    pub fn tick(&self) -> Result<bool> {
        let _tick = acquire_lock(&self.tick_lock);

        let (cursor, draft, mut pending, total) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.answer.is_some() {
                return Ok(false);
            }
            (
                state.cursor,
                state.draft.clone(),
                state.carried.clone(),
                state.total_findings,
            )
        };

        let filter = cursor.map_or_else(EventFilter::all, EventFilter::after);
        let events = self.log.read(&filter)?;
        let new_cursor = events.last().map(|e| e.id).or(cursor);
        let before = pending.len();
        for event in events.iter().filter(|e| e.action == Action::Finding) {
            pending.push(event.decode::<FindingPayload>()?.finding);
        }
        let total = total + (pending.len() - before);

        if pending.is_empty() {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.cursor = new_cursor;
            return Ok(false);
        }

        let span = tracing::debug_span!("synthesize", new = pending.len(), total);
        let _enter = span.enter();
        let reply = self.collaborator.synthesize(&SynthesisRequest {
            query: &self.query,
            draft: draft.as_deref(),
            new_findings: &pending,
            total_findings: total,
        });

        match reply {
            Ok(text) => {
                let key = put_text(self.blobs.as_ref(), DRAFT_BLOB, &text)?;
                self.log.append(
                    EventDraft::new(SYNTHESIZER_PRODUCER, Phase::Synthesis, Action::SynthesisUpdate)
                        .with_payload(&SynthesisUpdate {
                            folded: pending.len(),
                            total_findings: total,
                        })?
                        .with_blob(DRAFT_BLOB, key),
                )?;
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                state.cursor = new_cursor;
                state.total_findings = total;
                state.carried.clear();
                state.draft = Some(text);
                metrics::counter!("trawl_synthesis_updates_total").increment(1);
                tracing::info!(folded = pending.len(), total, "Draft updated");
                Ok(true)
            },
            Err(e) if e.is_backend() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, carried = pending.len(), "Synthesis failed");
                self.log.append(
                    EventDraft::new(SYNTHESIZER_PRODUCER, Phase::Synthesis, Action::Error)
                        .with_payload(&ErrorPayload::new("synthesize", &e))?,
                )?;
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                state.cursor = new_cursor;
                state.total_findings = total;
                state.carried = pending;
                Ok(false)
            },
        }
    }

    /// Produces the terminal answer.
    ///
    /// Stops the ticker, runs one catch-up tick, then asks the collaborator to
    /// finalize over the draft and every finding in the log. With no findings at all, returns [`NOTHING_FOUND`]
    /// without calling it. If the finalize call fails, the last draft is
    /// used. The result is cached: later calls return it unchanged and make
    /// no collaborator calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the log or blob store fails.
    pub fn finalize(&self) -> Result<String> {
        self.stop();
        if let Some(answer) = self.cached_answer() {
            return Ok(answer);
        }
        self.tick()?;

        let _tick = acquire_lock(&self.tick_lock);
        if let Some(answer) = self.cached_answer() {
            return Ok(answer);
        }
        let (draft, total) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            (state.draft.clone(), state.total_findings)
        };

        let (answer, fallback) = if total == 0 {
            (NOTHING_FOUND.to_string(), false)
        } else {
            let findings: Vec<Finding> = findings_after(self.log.as_ref(), None)?
                .into_iter()
                .map(|(_, finding)| finding)
                .collect();
            let draft = draft.unwrap_or_else(|| findings_digest(&findings));
            match self.collaborator.finalize(&FinalizeRequest {
                query: &self.query,
                draft: &draft,
                findings: &findings,
                total_findings: total,
            }) {
                Ok(answer) => (answer, false),
                Err(e) if e.is_backend() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Finalize failed, keeping last draft");
                    self.log.append(
                        EventDraft::new(SYNTHESIZER_PRODUCER, Phase::Synthesis, Action::Error)
                            .with_payload(&ErrorPayload::new("finalize", &e))?,
                    )?;
                    (draft, true)
                },
            }
        };

        let key = put_text(self.blobs.as_ref(), ANSWER_BLOB, &answer)?;
        self.log.append(
            EventDraft::new(SYNTHESIZER_PRODUCER, Phase::Synthesis, Action::Finalized)
                .with_payload(&FinalizedPayload {
                    total_findings: total,
                    fallback,
                })?
                .with_blob(ANSWER_BLOB, key),
        )?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.answer = Some(answer.clone());
        tracing::info!(total_findings = total, fallback, "Answer finalized");
        Ok(answer)
    }

    fn cached_answer(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .answer
            .clone()
    }
}

impl Drop for IncrementalSynthesizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Plain listing of findings, used when no draft exists to finalize.
fn findings_digest(findings: &[Finding]) -> String {
    let mut digest = String::from("Findings so far:\n");
    for finding in findings {
        let _ = writeln!(digest, "- [{}] {}", finding.kind, finding.summary);
    }
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{TurnAnalysis, TurnAnalysisRequest};
    use crate::models::{DiscoveredItem, FindingKind, JudgeVerdict, SessionId};
    use crate::storage::{InMemoryBlobStore, InMemoryEventLog, get_text};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Writer {
        synth_calls: AtomicUsize,
        finalize_calls: AtomicUsize,
        fail_synthesis: AtomicBool,
        fail_finalize: AtomicBool,
        last_batch: Mutex<usize>,
        finalized_over: Mutex<Vec<String>>,
    }

    impl Collaborator for Writer {
        fn score_items(&self, _q: &str, _i: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>> {
            Ok(Vec::new())
        }

        fn analyze_turn(&self, _r: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis> {
            Ok(TurnAnalysis::default())
        }

        fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String> {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_synthesis.load(Ordering::SeqCst) {
                return Err(Error::collaborator("synthesize", "rate limited"));
            }
            *acquire_lock(&self.last_batch) = request.new_findings.len();
            Ok(format!("draft with {} findings (in progress)", request.total_findings))
        }

        fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<String> {
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            *acquire_lock(&self.finalized_over) =
                request.findings.iter().map(|f| f.summary.clone()).collect();
            if self.fail_finalize.load(Ordering::SeqCst) {
                return Err(Error::collaborator("finalize", "timeout"));
            }
            Ok(format!("final: {}", request.draft.replace(" (in progress)", "")))
        }
    }

    fn emit_finding(log: &dyn EventLog, summary: &str) {
        let payload = FindingPayload {
            finding: Finding {
                kind: FindingKind::Decision,
                summary: summary.to_string(),
                detail: String::new(),
                related_entities: vec![],
                source_item_id: "i".to_string(),
                confidence: 0.8,
            },
            turn_index: 0,
            thread_id: "t".to_string(),
        };
        log.append(
            EventDraft::new("worker-0", Phase::Work, Action::Finding)
                .with_payload(&payload)
                .unwrap(),
        )
        .unwrap();
    }

    type Fixture = (
        Arc<InMemoryEventLog>,
        Arc<InMemoryBlobStore>,
        Arc<Writer>,
        IncrementalSynthesizer,
    );

    fn setup() -> Fixture {
        let log = Arc::new(InMemoryEventLog::new(SessionId::new("s")));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let writer = Arc::new(Writer::default());
        let synthesizer = IncrementalSynthesizer::new(
            log.clone(),
            blobs.clone(),
            writer.clone(),
            "why?",
        );
        (log, blobs, writer, synthesizer)
    }

    #[test]
    fn test_tick_without_findings_advances_cursor() {
        let (log, _blobs, writer, synthesizer) = setup();
        log.append(EventDraft::new("router", Phase::Search, Action::SearchComplete))
            .unwrap();

        assert!(!synthesizer.tick().unwrap());
        assert_eq!(writer.synth_calls.load(Ordering::SeqCst), 0);
        assert!(synthesizer.current_answer().is_none());
        assert_eq!(
            synthesizer.state.read().unwrap().cursor,
            Some(EventId::new(1))
        );
    }

    #[test]
    fn test_tick_folds_only_new_findings() {
        let (log, blobs, writer, synthesizer) = setup();
        emit_finding(log.as_ref(), "a");
        emit_finding(log.as_ref(), "b");
        assert!(synthesizer.tick().unwrap());
        assert_eq!(*writer.last_batch.lock().unwrap(), 2);

        emit_finding(log.as_ref(), "c");
        assert!(synthesizer.tick().unwrap());
        assert_eq!(*writer.last_batch.lock().unwrap(), 1);
        assert_eq!(synthesizer.total_findings(), 3);
        assert!(!synthesizer.tick().unwrap());

        let updates = log
            .read(&EventFilter::actions(&[Action::SynthesisUpdate]))
            .unwrap();
        assert_eq!(updates.len(), 2);
        let key = updates[1].blob(DRAFT_BLOB).unwrap();
        assert_eq!(
            get_text(blobs.as_ref(), key).unwrap(),
            "draft with 3 findings (in progress)"
        );
    }

    #[test]
    fn test_failed_tick_carries_findings() {
        let (log, _blobs, writer, synthesizer) = setup();
        emit_finding(log.as_ref(), "a");
        writer.fail_synthesis.store(true, Ordering::SeqCst);
        assert!(!synthesizer.tick().unwrap());
        assert_eq!(log.read(&EventFilter::actions(&[Action::Error])).unwrap().len(), 1);

        writer.fail_synthesis.store(false, Ordering::SeqCst);
        emit_finding(log.as_ref(), "b");
        assert!(synthesizer.tick().unwrap());
        assert_eq!(*writer.last_batch.lock().unwrap(), 2);
        assert_eq!(synthesizer.total_findings(), 2);
    }

    #[test]
    fn test_finalize_without_findings() {
        let (_log, _blobs, writer, synthesizer) = setup();
        assert_eq!(synthesizer.finalize().unwrap(), NOTHING_FOUND);
        assert_eq!(writer.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (log, _blobs, writer, synthesizer) = setup();
        emit_finding(log.as_ref(), "a");

        let first = synthesizer.finalize().unwrap();
        assert_eq!(first, "final: draft with 1 findings");
        let calls = (
            writer.synth_calls.load(Ordering::SeqCst),
            writer.finalize_calls.load(Ordering::SeqCst),
        );
        let events = log.len().unwrap();

        emit_finding(log.as_ref(), "late");
        let second = synthesizer.finalize().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            calls,
            (
                writer.synth_calls.load(Ordering::SeqCst),
                writer.finalize_calls.load(Ordering::SeqCst),
            )
        );
        assert_eq!(log.len().unwrap(), events + 1);
        assert_eq!(synthesizer.current_answer().as_deref(), Some(first.as_str()));
        assert_eq!(
            log.read(&EventFilter::actions(&[Action::Finalized])).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_finalize_sees_every_finding() {
        let (log, _blobs, writer, synthesizer) = setup();
        emit_finding(log.as_ref(), "a");
        emit_finding(log.as_ref(), "b");
        assert!(synthesizer.tick().unwrap());
        // Folded into the draft already, but still handed to the final pass.
        emit_finding(log.as_ref(), "c");

        synthesizer.finalize().unwrap();
        assert_eq!(
            *writer.finalized_over.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_finalize_falls_back_to_draft() {
        let (log, _blobs, writer, synthesizer) = setup();
        emit_finding(log.as_ref(), "a");
        writer.fail_finalize.store(true, Ordering::SeqCst);

        let answer = synthesizer.finalize().unwrap();
        assert_eq!(answer, "draft with 1 findings (in progress)");
        let finalized = log.read(&EventFilter::actions(&[Action::Finalized])).unwrap();
        let payload: FinalizedPayload = finalized[0].decode().unwrap();
        assert!(payload.fallback);
    }

    #[test]
    fn test_ticker_runs_in_background() {
        let log = Arc::new(InMemoryEventLog::new(SessionId::new("s")));
        let writer = Arc::new(Writer::default());
        let synthesizer = Arc::new(IncrementalSynthesizer::new(
            log.clone(),
            Arc::new(InMemoryBlobStore::new()),
            writer.clone(),
            "why?",
        ));
        synthesizer.start(Duration::from_millis(10)).unwrap();
        emit_finding(log.as_ref(), "a");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while synthesizer.current_answer().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(synthesizer.current_answer().is_some());
        synthesizer.stop();
        assert_eq!(writer.synth_calls.load(Ordering::SeqCst), 1);
    }
}
