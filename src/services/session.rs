//! Session API.
//!
//! [`ExplorationService`] owns the long-lived collaborators (search backend,
//! thread datastore, reasoning model, storage factory) and hands out one
//! [`SessionHandle`] per question.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = ExplorationService::from_config(&config)?;
//! let session = service.start_session("why was the cache removed?", "backend")?;
//! let outcome = service.run_to_convergence(&session)?;
//! println!("{} after {} iterations", outcome.state, outcome.iterations);
//! println!("{}", service.finalize(&session)?);
//! ```

use super::backend_factory::SessionBackendFactory;
use super::router::DiscoverySearchRouter;
use super::scheduler::{LoopManager, LoopOutcome, LoopState};
use super::synthesizer::IncrementalSynthesizer;
use super::worker::LeadMemo;
use crate::config::{ExplorationConfig, TrawlConfig};
use crate::llm::{Collaborator, LlmCollaborator, create_provider};
use crate::models::{
    Action, Event, EventDraft, Phase, SearchRequest, SearchRequestPayload, SessionId, SessionInfo,
};
use crate::storage::{
    BlobStore, EventFilter, EventLog, SearchBackend, SqliteHistoryStore, ThreadStore,
};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// Producer name for session setup events.
pub const SESSION_PRODUCER: &str = "session";

/// One running exploration session.
pub struct SessionHandle {
    id: SessionId,
    query: String,
    scope_id: String,
    log: Arc<dyn EventLog>,
    blobs: Arc<dyn BlobStore>,
    router: DiscoverySearchRouter,
    leads: LeadMemo,
    synthesizer: Arc<IncrementalSynthesizer>,
    stop: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// The user's question.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Corpus scope.
    #[must_use]
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// The session's event log.
    #[must_use]
    pub fn log(&self) -> &dyn EventLog {
        self.log.as_ref()
    }

    /// The session's blob store.
    #[must_use]
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// The session's synthesizer.
    #[must_use]
    pub const fn synthesizer(&self) -> &Arc<IncrementalSynthesizer> {
        &self.synthesizer
    }

    /// Shared stop flag, for signal handlers.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Asks the loop to stop before its next iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("scope_id", &self.scope_id)
            .finish_non_exhaustive()
    }
}

/// Runs exploration sessions.
pub struct ExplorationService {
    config: ExplorationConfig,
    search: Arc<dyn SearchBackend>,
    threads: Arc<dyn ThreadStore>,
    collaborator: Arc<dyn Collaborator>,
    factory: SessionBackendFactory,
}

impl ExplorationService {
    /// Creates a service with in-memory session storage.
    #[must_use]
    pub fn new(
        config: ExplorationConfig,
        search: Arc<dyn SearchBackend>,
        threads: Arc<dyn ThreadStore>,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self {
            config,
            search,
            threads,
            collaborator,
            factory: SessionBackendFactory::memory(),
        }
    }

    /// Replaces the session storage factory.
    #[must_use]
    pub fn with_session_backend(mut self, factory: SessionBackendFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Builds a service from configuration: the history database serves
    /// both search and threads, the configured LLM provider backs the
    /// collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no LLM provider is configured or
    /// [`Error::Backend`] if the history database cannot be opened.
    pub fn from_config(config: &TrawlConfig) -> Result<Self> {
        let history = Arc::new(SqliteHistoryStore::open(config.history_db_path())?);
        let provider = create_provider(&config.llm)?;
        let collaborator: Arc<dyn Collaborator> = Arc::new(LlmCollaborator::new(provider));
        let search: Arc<dyn SearchBackend> = history.clone();
        let threads: Arc<dyn ThreadStore> = history;
        Ok(
            Self::new(config.exploration.clone(), search, threads, collaborator)
                .with_session_backend(SessionBackendFactory::from_config(config)),
        )
    }

    /// Exploration tuning in use.
    #[must_use]
    pub const fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    /// Opens a session: records the question, seeds the iteration-0 search
    /// and starts the synthesizer ticker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty query, or
    /// [`Error::Backend`] if session storage fails.
    #[instrument(skip(self), fields(session))]
    pub fn start_session(&self, query: &str, scope_id: &str) -> Result<SessionHandle> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }

        let id = SessionId::generate();
        tracing::Span::current().record("session", id.as_str());
        let (log, blobs) = self.factory.create(&id)?;

        let started = log.append(
            EventDraft::new(SESSION_PRODUCER, Phase::Seeding, Action::SessionStarted)
                .with_payload(&SessionInfo {
                    query: query.to_string(),
                    scope_id: scope_id.to_string(),
                })?,
        )?;
        log.append(
            EventDraft::new(SESSION_PRODUCER, Phase::Seeding, Action::RequestSearch)
                .with_payload(&SearchRequestPayload {
                    request: SearchRequest::initial(query),
                    lead: None,
                })?
                .caused_by(started),
        )?;

        let router = DiscoverySearchRouter::new(
            Arc::clone(&self.search),
            scope_id,
            self.config.search_limit,
        );
        let synthesizer = Arc::new(IncrementalSynthesizer::new(
            Arc::clone(&log),
            Arc::clone(&blobs),
            Arc::clone(&self.collaborator),
            query,
        ));
        synthesizer.start(self.config.synthesis_interval())?;

        metrics::counter!("trawl_sessions_started_total").increment(1);
        tracing::info!(state = %LoopState::Seeding, scope = scope_id, "Session started");

        Ok(SessionHandle {
            id,
            query: query.to_string(),
            scope_id: scope_id.to_string(),
            log,
            blobs,
            router,
            leads: LeadMemo::new(),
            synthesizer,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs iterations until the session converges, hits the iteration cap
    /// or is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if session storage or the thread datastore
    /// fails.
    #[instrument(skip(self, handle), fields(session = %handle.id))]
    pub fn run_to_convergence(&self, handle: &SessionHandle) -> Result<LoopOutcome> {
        let manager = LoopManager {
            log: handle.log(),
            blobs: handle.blobs(),
            router: &handle.router,
            leads: &handle.leads,
            threads: self.threads.as_ref(),
            collaborator: self.collaborator.as_ref(),
            query: &handle.query,
            config: &self.config,
            stop: &handle.stop,
        };
        manager.run()
    }

    /// Latest draft (or final) answer, never blocking on the collaborator.
    #[must_use]
    pub fn current_answer(&self, handle: &SessionHandle) -> Option<String> {
        handle.synthesizer.current_answer()
    }

    /// Produces the final answer. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if session storage fails.
    pub fn finalize(&self, handle: &SessionHandle) -> Result<String> {
        handle.synthesizer.finalize()
    }

    /// Every event of the session, in append order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the log cannot be read.
    pub fn audit_trail(&self, handle: &SessionHandle) -> Result<Vec<Event>> {
        handle.log.read(&EventFilter::all())
    }

    /// Reads the events of a session created earlier, possibly by another
    /// process when the durable backend is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session.
    pub fn open_audit(&self, session_id: &SessionId) -> Result<Vec<Event>> {
        let (log, _) = self.factory.open_existing(session_id)?;
        log.read(&EventFilter::all())
    }

    /// Lists known sessions with their event counts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if session storage cannot be read.
    pub fn list_sessions(&self) -> Result<Vec<(SessionId, usize)>> {
        self.factory.list_sessions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinalizeRequest, SynthesisRequest, TurnAnalysis, TurnAnalysisRequest};
    use crate::models::{DiscoveredItem, JudgeVerdict, SearchFilters, Turn};
    use crate::services::queue::pending_searches;

    struct Empty;

    impl SearchBackend for Empty {
        fn search(&self, _: &str, _: &str, _: &SearchFilters, _: usize) -> Result<Vec<DiscoveredItem>> {
            Ok(Vec::new())
        }
    }

    impl ThreadStore for Empty {
        fn full_thread(&self, thread_id: &str) -> Result<Vec<Turn>> {
            Err(Error::NotFound {
                kind: "thread",
                key: thread_id.to_string(),
            })
        }
    }

    impl Collaborator for Empty {
        fn score_items(&self, _: &str, _: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>> {
            Ok(Vec::new())
        }

        fn analyze_turn(&self, _: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis> {
            Ok(TurnAnalysis::default())
        }

        fn synthesize(&self, _: &SynthesisRequest<'_>) -> Result<String> {
            Ok(String::new())
        }

        fn finalize(&self, _: &FinalizeRequest<'_>) -> Result<String> {
            Ok(String::new())
        }
    }

    fn service() -> ExplorationService {
        let empty = Arc::new(Empty);
        ExplorationService::new(
            ExplorationConfig::default().with_synthesis_interval_ms(60_000),
            empty.clone(),
            empty.clone(),
            empty,
        )
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = service().start_session("   ", "proj").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_start_session_seeds_log() {
        let service = service();
        let session = service.start_session("  why sqlite?  ", "proj").unwrap();
        assert_eq!(session.query(), "why sqlite?");

        let events = service.audit_trail(&session).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, Action::SessionStarted);
        assert_eq!(events[1].action, Action::RequestSearch);
        assert!(events[1].references(events[0].id));

        let pending = pending_searches(session.log()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.iteration, 0);
        assert_eq!(pending[0].request.query_text, "why sqlite?");
    }

    #[test]
    fn test_nothing_found_converges() {
        let service = service();
        let session = service.start_session("anything", "proj").unwrap();
        let outcome = service.run_to_convergence(&session).unwrap();
        assert_eq!(outcome.state, LoopState::Converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(
            service.finalize(&session).unwrap(),
            crate::services::synthesizer::NOTHING_FOUND
        );
    }

    #[test]
    fn test_stop_before_first_iteration() {
        let service = service();
        let session = service.start_session("anything", "proj").unwrap();
        session.request_stop();
        let outcome = service.run_to_convergence(&session).unwrap();
        assert_eq!(outcome.state, LoopState::Stopped);
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_open_audit() {
        let service = service();
        let session = service.start_session("anything", "proj").unwrap();
        assert_eq!(service.open_audit(session.id()).unwrap().len(), 2);
        assert_eq!(service.list_sessions().unwrap().len(), 1);
        assert!(matches!(
            service.open_audit(&SessionId::new("unknown")),
            Err(Error::NotFound { .. })
        ));
    }
}
