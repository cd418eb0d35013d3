//! End-to-end exploration sessions against scripted collaborators.
//!
//! Every test runs the real loop (router, gate, worker pool, synthesizer)
//! over in-memory session storage. Search, threads and reasoning are
//! replaced by deterministic mocks.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_precision_loss)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use trawl::llm::{FinalizeRequest, SynthesisRequest, TurnAnalysis, TurnAnalysisRequest};
use trawl::models::{
    ClaimPayload, ErrorPayload, FindingPayload, ItemKind, SearchRequestPayload, SearchSummary,
    WorkItem,
};
use trawl::services::{LoopState, SESSION_PRODUCER, SYNTHESIZER_PRODUCER};
use trawl::{
    Action, Collaborator, DiscoveredItem, Error, Event, ExplorationConfig, ExplorationService,
    Finding, FindingKind, JudgeVerdict, Lead, LeadKind, LeadPriority, Phase, Result, SearchBackend,
    SearchFilters, ThreadStore, Turn,
};

// ============================================================================
// Mocks
// ============================================================================

const SECRET_CONTENT: &str = "content-marker-7f3a";
const FINAL_ANSWER: &str = "final-answer-marker-91c2";

fn item(id: &str, thread: &str) -> DiscoveredItem {
    DiscoveredItem {
        id: id.to_string(),
        thread_id: thread.to_string(),
        kind: ItemKind::Turn,
        title: format!("title of {id}"),
        content: format!("{SECRET_CONTENT} {id}"),
        relevance_hint: 0.5,
        occurred_at: None,
    }
}

/// Returns the same fixed corpus for every query.
struct FixedCorpus {
    items: Vec<DiscoveredItem>,
    calls: AtomicUsize,
}

impl FixedCorpus {
    fn with_items(count: usize) -> Self {
        Self {
            items: (0..count)
                .map(|i| item(&format!("item-{i:02}"), &format!("thread-{i:02}")))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl SearchBackend for FixedCorpus {
    fn search(
        &self,
        _query_text: &str,
        _scope_id: &str,
        _filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<DiscoveredItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

/// Returns two never-seen items for every query.
struct EndlessCorpus {
    next: AtomicUsize,
}

impl SearchBackend for EndlessCorpus {
    fn search(
        &self,
        _query_text: &str,
        _scope_id: &str,
        _filters: &SearchFilters,
        _limit: usize,
    ) -> Result<Vec<DiscoveredItem>> {
        let n = self.next.fetch_add(2, Ordering::SeqCst);
        Ok(vec![
            item(&format!("gen-{n}"), &format!("gen-thread-{n}")),
            item(&format!("gen-{}", n + 1), &format!("gen-thread-{}", n + 1)),
        ])
    }
}

/// Every thread has two turns.
struct Threads;

impl ThreadStore for Threads {
    fn full_thread(&self, thread_id: &str) -> Result<Vec<Turn>> {
        Ok((0..2)
            .map(|index| Turn {
                thread_id: thread_id.to_string(),
                index,
                role: if index == 0 { "user" } else { "assistant" }.to_string(),
                content: format!("turn {index} of {thread_id}"),
                occurred_at: None,
            })
            .collect())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Leads {
    /// A single medium lead, never forwarded.
    None,
    /// Four high and one medium lead per turn, same queries every time.
    Burst,
    /// One fresh high lead per turn.
    Endless,
}

struct Scripted {
    scores: HashMap<String, f32>,
    default_score: f32,
    fail_batches_with: Option<String>,
    leads: Leads,
    analyze_delay: Duration,
    lead_counter: AtomicUsize,
    score_calls: AtomicUsize,
    synth_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    synth_inputs: Mutex<Vec<usize>>,
}

impl Scripted {
    fn new(leads: Leads) -> Self {
        Self {
            scores: HashMap::new(),
            default_score: 2.0,
            fail_batches_with: None,
            leads,
            analyze_delay: Duration::ZERO,
            lead_counter: AtomicUsize::new(0),
            score_calls: AtomicUsize::new(0),
            synth_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            synth_inputs: Mutex::new(Vec::new()),
        }
    }

    fn scoring(mut self, id: &str, score: f32) -> Self {
        self.scores.insert(id.to_string(), score);
        self
    }

    fn lead(kind: LeadKind, query: &str, priority: LeadPriority) -> Lead {
        Lead {
            kind,
            value: String::new(),
            search_query_text: query.to_string(),
            rationale: "mentioned in passing".to_string(),
            priority,
        }
    }
}

impl Collaborator for Scripted {
    fn score_items(&self, _query: &str, items: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(bad) = &self.fail_batches_with {
            if items.iter().any(|i| &i.id == bad) {
                return Err(Error::collaborator("score_items", "model timed out"));
            }
        }
        Ok(items
            .iter()
            .map(|i| JudgeVerdict {
                item_id: i.id.clone(),
                score: self.scores.get(&i.id).copied().unwrap_or(self.default_score),
                rationale: String::new(),
            })
            .collect())
    }

    fn analyze_turn(&self, request: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis> {
        if !self.analyze_delay.is_zero() {
            std::thread::sleep(self.analyze_delay);
        }
        let finding = Finding {
            kind: FindingKind::Decision,
            summary: format!("decision in {}", request.turn.content),
            detail: String::new(),
            related_entities: Vec::new(),
            source_item_id: String::new(),
            confidence: 0.8,
        };
        let leads = match self.leads {
            Leads::None => vec![Self::lead(LeadKind::Entity, "cache", LeadPriority::Medium)],
            Leads::Burst => vec![
                Self::lead(LeadKind::Entity, "redis", LeadPriority::High),
                Self::lead(LeadKind::Person, "dana", LeadPriority::High),
                Self::lead(LeadKind::File, "src/cache.rs", LeadPriority::High),
                Self::lead(LeadKind::Commit, "9f1c2e", LeadPriority::High),
                Self::lead(LeadKind::Entity, "memcached", LeadPriority::Medium),
            ],
            Leads::Endless => {
                let n = self.lead_counter.fetch_add(1, Ordering::SeqCst);
                vec![Self::lead(LeadKind::Entity, &format!("topic {n}"), LeadPriority::High)]
            },
        };
        Ok(TurnAnalysis {
            findings: vec![finding],
            leads,
        })
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String> {
        self.synth_calls.fetch_add(1, Ordering::SeqCst);
        self.synth_inputs
            .lock()
            .unwrap()
            .push(request.new_findings.len());
        Ok(format!("draft covering {} findings", request.total_findings))
    }

    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<String> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{FINAL_ANSWER} ({} findings)", request.total_findings))
    }
}

fn config() -> ExplorationConfig {
    ExplorationConfig::default()
        .with_max_workers(5)
        .with_worker_stagger_ms(20)
        // Ticks are driven by finalize() so assertions stay deterministic.
        .with_synthesis_interval_ms(3_600_000)
}

fn service(
    search: Arc<dyn SearchBackend>,
    collaborator: Arc<Scripted>,
    config: ExplorationConfig,
) -> ExplorationService {
    ExplorationService::new(config, search, Arc::new(Threads), collaborator)
}

fn of_action(events: &[Event], action: Action) -> Vec<&Event> {
    events.iter().filter(|e| e.action == action).collect()
}

/// Five of twelve items score above the threshold.
fn twelve_item_collaborator(leads: Leads) -> Scripted {
    Scripted::new(leads)
        .scoring("item-01", 9.0)
        .scoring("item-03", 7.0)
        .scoring("item-05", 8.5)
        .scoring("item-08", 7.5)
        .scoring("item-11", 10.0)
        .scoring("item-02", 6.9)
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn test_twelve_item_scenario() {
    let collaborator = Arc::new(twelve_item_collaborator(Leads::None));
    let service = service(
        Arc::new(FixedCorpus::with_items(12)),
        collaborator.clone(),
        config(),
    );
    let session = service.start_session("why did we drop redis?", "acme").unwrap();

    let outcome = service.run_to_convergence(&session).unwrap();
    assert_eq!(outcome.state, LoopState::Converged);
    assert_eq!(outcome.iterations, 1);

    let events = service.audit_trail(&session).unwrap();
    assert_eq!(of_action(&events, Action::JudgeComplete).len(), 2);
    assert_eq!(collaborator.score_calls.load(Ordering::SeqCst), 2);

    let queued: Vec<WorkItem> = of_action(&events, Action::AddToQueue)
        .iter()
        .map(|e| e.decode().unwrap())
        .collect();
    assert_eq!(queued.len(), 5);
    assert!(queued.iter().all(|w| w.priority >= 7.0));
    let admitted: HashSet<&str> = queued.iter().map(|w| w.item_id.as_str()).collect();
    assert_eq!(
        admitted,
        HashSet::from(["item-01", "item-03", "item-05", "item-08", "item-11"])
    );

    let claimed: HashSet<String> = of_action(&events, Action::ClaimWork)
        .iter()
        .map(|e| e.decode::<ClaimPayload>().unwrap().item_id)
        .collect();
    assert_eq!(claimed.len(), 5);
    assert!(claimed.iter().all(|id| admitted.contains(id.as_str())));

    // Only the session seed; medium leads are never forwarded.
    let requests = of_action(&events, Action::RequestSearch);
    assert_eq!(requests.len(), 1);
    let from_workers = requests
        .iter()
        .filter(|e| e.producer != SESSION_PRODUCER)
        .count();
    assert_eq!(from_workers, 0);
    assert_eq!(of_action(&events, Action::Finding).len(), 10);

    let answer = service.finalize(&session).unwrap();
    assert!(answer.starts_with(FINAL_ANSWER));
    assert!(answer.contains("10 findings"));
}

#[test]
fn test_every_queued_item_backed_by_admitting_verdict() {
    let collaborator = Arc::new(twelve_item_collaborator(Leads::None));
    let service = service(Arc::new(FixedCorpus::with_items(12)), collaborator, config());
    let session = service.start_session("q", "acme").unwrap();
    service.run_to_convergence(&session).unwrap();

    let events = service.audit_trail(&session).unwrap();
    let by_id: HashMap<_, _> = events.iter().map(|e| (e.id, e)).collect();
    for queued in of_action(&events, Action::AddToQueue) {
        let item: WorkItem = queued.decode().unwrap();
        let judge = queued
            .causal_refs
            .iter()
            .filter_map(|id| by_id.get(id))
            .find(|e| e.action == Action::JudgeComplete)
            .expect("add_to_queue must reference its judge");
        let report: trawl::models::JudgeReport = judge.decode().unwrap();
        let verdict = report
            .verdicts
            .iter()
            .find(|v| v.item_id == item.item_id)
            .unwrap();
        assert!(verdict.score >= 7.0);
        assert!((verdict.score - item.priority).abs() < f32::EPSILON);
    }
}

// ============================================================================
// Leads
// ============================================================================

#[test]
fn test_lead_cap_per_turn() {
    let collaborator = Arc::new(Scripted::new(Leads::Burst).scoring("item-00", 9.0));
    let service = service(
        Arc::new(FixedCorpus::with_items(3)),
        collaborator,
        config().with_max_iterations(1),
    );
    let session = service.start_session("q", "acme").unwrap();
    let outcome = service.run_to_convergence(&session).unwrap();
    assert_eq!(outcome.state, LoopState::MaxIterationsReached);

    let events = service.audit_trail(&session).unwrap();
    let claim_ids: HashSet<_> = of_action(&events, Action::ClaimWork)
        .iter()
        .map(|e| e.id)
        .collect();

    let mut per_turn: HashMap<(String, String, usize), usize> = HashMap::new();
    for event in of_action(&events, Action::RequestSearch) {
        let payload: SearchRequestPayload = event.decode().unwrap();
        let Some(lead) = payload.lead else {
            continue;
        };
        assert_eq!(lead.priority, LeadPriority::High);
        assert_eq!(payload.request.iteration, 1);
        let origin = payload.request.origin_event_id.unwrap();
        assert!(claim_ids.contains(&origin));
        assert!(event.references(origin));
        *per_turn
            .entry((event.producer.clone(), lead.item_id, lead.turn_index))
            .or_default() += 1;
    }
    // Two turns, two leads each. The memo pushes the second turn past the
    // leads the first one already forwarded.
    assert_eq!(per_turn.len(), 2);
    assert!(per_turn.values().all(|&n| n == 2));

    let queries: HashSet<String> = of_action(&events, Action::RequestSearch)
        .iter()
        .filter_map(|e| e.decode::<SearchRequestPayload>().ok())
        .filter(|p| p.lead.is_some())
        .map(|p| p.request.query_text)
        .collect();
    assert_eq!(queries.len(), 4);
    assert!(!queries.contains("memcached"));
}

#[test]
fn test_repeated_lead_requested_once_per_session() {
    // Every turn of every iteration emits the same four high leads.
    let collaborator = Arc::new(Scripted {
        default_score: 9.0,
        ..Scripted::new(Leads::Burst)
    });
    let service = service(
        Arc::new(EndlessCorpus {
            next: AtomicUsize::new(0),
        }),
        collaborator,
        config().with_max_iterations(4).with_worker_stagger_ms(0),
    );
    let session = service.start_session("q", "acme").unwrap();
    let outcome = service.run_to_convergence(&session).unwrap();

    // Iteration 1 analyzes fresh items but has nothing new to request.
    assert_eq!(outcome.state, LoopState::Converged);
    assert_eq!(outcome.iterations, 2);

    let events = service.audit_trail(&session).unwrap();
    let later_claims = of_action(&events, Action::ClaimWork)
        .iter()
        .filter(|e| e.producer.starts_with("worker-1-"))
        .count();
    assert!(later_claims > 0);

    let mut requested = HashSet::new();
    for event in of_action(&events, Action::RequestSearch) {
        let payload: SearchRequestPayload = event.decode().unwrap();
        if payload.lead.is_some() {
            assert!(
                requested.insert((payload.request.lead_kind, payload.request.query_text.clone())),
                "{} requested twice",
                payload.request.query_text
            );
        }
    }
    assert_eq!(requested.len(), 4);
}

#[test]
fn test_terminates_at_max_iterations() {
    let collaborator = Arc::new(Scripted {
        default_score: 9.0,
        ..Scripted::new(Leads::Endless)
    });
    let service = service(
        Arc::new(EndlessCorpus {
            next: AtomicUsize::new(0),
        }),
        collaborator,
        config().with_max_iterations(2).with_worker_stagger_ms(0),
    );
    let session = service.start_session("q", "acme").unwrap();
    let outcome = service.run_to_convergence(&session).unwrap();

    assert_eq!(outcome.state, LoopState::MaxIterationsReached);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.reports[0].iteration, 0);
    assert_eq!(outcome.reports[1].iteration, 1);
    assert!(outcome.reports[1].searches > 1);

    let events = service.audit_trail(&session).unwrap();
    let unresolved = trawl::services::queue::pending_searches(session.log()).unwrap();
    assert!(!unresolved.is_empty());
    assert!(unresolved.iter().all(|p| p.request.iteration == 2));
    assert!(of_action(&events, Action::ClaimWork).len() >= 2);
}

#[test]
fn test_no_duplicate_items_across_searches() {
    let collaborator = Arc::new(Scripted {
        default_score: 9.0,
        ..Scripted::new(Leads::Burst)
    });
    let corpus = Arc::new(FixedCorpus::with_items(4));
    let service = service(corpus.clone(), collaborator, config().with_max_iterations(3));
    let session = service.start_session("q", "acme").unwrap();
    service.run_to_convergence(&session).unwrap();

    let events = service.audit_trail(&session).unwrap();
    let completes = of_action(&events, Action::SearchComplete);
    assert!(completes.len() > 1);
    assert!(corpus.calls.load(Ordering::SeqCst) > 1);

    let mut seen = HashSet::new();
    for event in completes {
        let summary: SearchSummary = event.decode().unwrap();
        for id in summary.item_ids {
            assert!(seen.insert(id.clone()), "{id} returned twice");
        }
    }
    assert_eq!(seen.len(), 4);
}

// ============================================================================
// Judges
// ============================================================================

#[test]
fn test_judge_failure_is_isolated() {
    let collaborator = Arc::new(Scripted {
        fail_batches_with: Some("item-00".to_string()),
        ..twelve_item_collaborator(Leads::None)
    });
    let service = service(Arc::new(FixedCorpus::with_items(12)), collaborator, config());
    let session = service.start_session("q", "acme").unwrap();
    let outcome = service.run_to_convergence(&session).unwrap();
    assert_eq!(outcome.state, LoopState::Converged);
    assert_eq!(outcome.reports[0].judges, 2);

    let events = service.audit_trail(&session).unwrap();
    let judge_errors: Vec<_> = of_action(&events, Action::Error)
        .into_iter()
        .filter(|e| e.phase == Phase::Judge)
        .collect();
    assert_eq!(judge_errors.len(), 1);
    let error: ErrorPayload = judge_errors[0].decode().unwrap();
    assert_eq!(error.kind, "collaborator");

    // The first batch (item-00..item-05) is lost; the second still admits.
    let admitted: HashSet<String> = of_action(&events, Action::AddToQueue)
        .iter()
        .map(|e| e.decode::<WorkItem>().unwrap().item_id)
        .collect();
    assert_eq!(admitted, HashSet::from(["item-08".to_string(), "item-11".to_string()]));
}

// ============================================================================
// Synthesis
// ============================================================================

#[test]
fn test_finalize_is_idempotent() {
    let collaborator = Arc::new(twelve_item_collaborator(Leads::None));
    let service = service(
        Arc::new(FixedCorpus::with_items(12)),
        collaborator.clone(),
        config(),
    );
    let session = service.start_session("q", "acme").unwrap();
    service.run_to_convergence(&session).unwrap();

    let first = service.finalize(&session).unwrap();
    let second = service.finalize(&session).unwrap();
    assert_eq!(first, second);
    assert_eq!(collaborator.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.current_answer(&session), Some(first));

    let events = service.audit_trail(&session).unwrap();
    let finalized = of_action(&events, Action::Finalized);
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].producer, SYNTHESIZER_PRODUCER);

    // The catch-up tick saw every finding exactly once.
    assert_eq!(collaborator.synth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(collaborator.synth_inputs.lock().unwrap().iter().sum::<usize>(), 10);
}

#[test]
fn test_synthesis_runs_alongside_workers() {
    let collaborator = Arc::new(Scripted {
        default_score: 9.0,
        analyze_delay: Duration::from_millis(15),
        ..Scripted::new(Leads::None)
    });
    let service = service(
        Arc::new(FixedCorpus::with_items(4)),
        collaborator.clone(),
        config()
            .with_max_workers(2)
            .with_worker_stagger_ms(30)
            .with_synthesis_interval_ms(5),
    );
    let session = service.start_session("q", "acme").unwrap();
    let outcome = service.run_to_convergence(&session).unwrap();
    assert_eq!(outcome.state, LoopState::Converged);
    let answer = service.finalize(&session).unwrap();
    assert!(answer.starts_with(FINAL_ANSWER));

    let events = service.audit_trail(&session).unwrap();
    let findings = of_action(&events, Action::Finding);
    assert_eq!(findings.len(), 8);

    // Every finding is folded exactly once across background and catch-up ticks.
    let inputs = collaborator.synth_inputs.lock().unwrap().clone();
    assert_eq!(inputs.iter().sum::<usize>(), findings.len());
    assert!(collaborator.synth_calls.load(Ordering::SeqCst) >= 2);

    let first = findings.first().unwrap().id;
    let last = findings.last().unwrap().id;
    let interleaved = of_action(&events, Action::SynthesisUpdate)
        .iter()
        .filter(|e| e.id > first && e.id < last)
        .count();
    assert!(interleaved > 0, "no draft update landed while workers ran");
}

#[test]
fn test_payloads_never_embed_content() {
    let collaborator = Arc::new(twelve_item_collaborator(Leads::None));
    let service = service(Arc::new(FixedCorpus::with_items(12)), collaborator, config());
    let session = service.start_session("q", "acme").unwrap();
    service.run_to_convergence(&session).unwrap();
    let answer = service.finalize(&session).unwrap();

    let events = service.audit_trail(&session).unwrap();
    for event in &events {
        let payload = event.payload.to_string();
        assert!(!payload.contains(SECRET_CONTENT), "{} embeds item content", event.action);
        assert!(!payload.contains(FINAL_ANSWER), "{} embeds the answer", event.action);
        assert!(!payload.contains("draft covering"), "{} embeds the draft", event.action);
    }

    let complete = of_action(&events, Action::SearchComplete)[0];
    let results = trawl::services::queue::search_results(session.blobs(), complete).unwrap();
    assert_eq!(results.len(), 12);
    assert!(results[0].content.contains(SECRET_CONTENT));

    let finalized = of_action(&events, Action::Finalized)[0];
    let key = finalized.blob(trawl::services::ANSWER_BLOB).unwrap();
    assert_eq!(trawl::storage::get_text(session.blobs(), key).unwrap(), answer);

    let findings: Vec<FindingPayload> = of_action(&events, Action::Finding)
        .iter()
        .map(|e| e.decode().unwrap())
        .collect();
    assert!(findings.iter().all(|f| !f.finding.source_item_id.is_empty()));
}
