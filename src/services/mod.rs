//! Business logic services.
//!
//! Services drive a session over the storage backends. They share no state
//! with each other except the session's event log.

mod backend_factory;
mod gate;
pub mod queue;
mod router;
mod scheduler;
mod session;
mod synthesizer;
mod worker;

pub use backend_factory::{SessionBackendFactory, SessionBackends};
pub use gate::{Candidate, GateOutcome, RelevanceGate, judge_count, split_even, validate_verdicts};
pub use router::{DiscoverySearchRouter, ROUTER_PRODUCER, Route, RoutedSearch, route};
pub use scheduler::{IterationReport, LoopManager, LoopOutcome, LoopState};
pub use session::{ExplorationService, SESSION_PRODUCER, SessionHandle};
pub use synthesizer::{
    ANSWER_BLOB, DRAFT_BLOB, FinalizedPayload, IncrementalSynthesizer, NOTHING_FOUND,
    SYNTHESIZER_PRODUCER, SynthesisUpdate,
};
pub use worker::{
    LeadMemo, TRANSCRIPT_BLOB, Worker, WorkerContext, WorkerPool, WorkerStats, pool_size,
    select_leads, worker_name,
};
