//! # Trawl
//!
//! Iterative deep exploration of development history.
//!
//! Trawl answers open-ended questions over a corpus of conversations, commits
//! and file changes by running rounds of discovery, relevance judging and
//! per-thread investigation, assembling an answer while results arrive.
//!
//! ## Architecture
//!
//! - An append-only, per-session event log is the only coordination
//!   substrate. Bulky payloads live in a content-keyed blob store.
//! - The work queue, pending searches and processed sets are derived from the
//!   log on demand ([`services::queue`]); nothing else holds live state.
//! - Independent workers claim queued items optimistically, emit findings
//!   immediately and feed leads back into search.
//! - An incremental synthesizer tails the log on its own schedule.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trawl::{ExplorationService, TrawlConfig};
//!
//! let service = ExplorationService::from_config(&TrawlConfig::load_default())?;
//! let session = service.start_session("why did we drop redis?", "my-project")?;
//! let outcome = service.run_to_convergence(&session)?;
//! let answer = service.finalize(&session)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{ExplorationConfig, TrawlConfig};
pub use llm::{Collaborator, LlmCollaborator, LlmProvider};
pub use models::{
    Action, DiscoveredItem, Event, EventDraft, EventId, Finding, FindingKind, JudgeVerdict, Lead,
    LeadKind, LeadPriority, Phase, SearchFilters, SearchRequest, SessionId, Turn, WorkItem,
};
pub use services::{
    ExplorationService, IncrementalSynthesizer, LoopOutcome, LoopState, SessionHandle,
};
pub use storage::{BlobStore, EventFilter, EventLog, SearchBackend, ThreadStore};

/// Error type for trawl operations.
///
/// The variants mirror how a failure propagates through an exploration
/// session.
///
/// | Variant | Raised When | Propagation |
/// |---------|-------------|-------------|
/// | `Collaborator` | Search/LLM call fails or replies with unparsable data | Caught per unit, recorded as an `error` event |
/// | `Backend` | Event log, blob store or thread datastore unavailable | Aborts the session |
/// | `NotFound` | Unknown blob key or session | Caller decides |
/// | `InvalidInput` | Empty query, bad config values | Caller decides |
/// | `OperationFailed` | Config files, log files, other I/O | Caller decides |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external collaborator (search backend, reasoning model) failed.
    ///
    /// Raised when:
    /// - The HTTP call to an LLM provider fails or returns an error status
    /// - A reply cannot be parsed into the expected structure
    /// - A judge reply does not carry exactly one verdict per item
    /// - The search backend rejects a query
    #[error("collaborator '{operation}' failed: {cause}")]
    Collaborator {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The coordination substrate (log, blobs, thread datastore) failed.
    ///
    /// Not locally recoverable: the log is the only shared state, so the
    /// session cannot continue without it.
    #[error("backend '{operation}' failed: {cause}")]
    Backend {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A keyed resource does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Resource kind (blob, session).
        kind: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// An operation failed.
    ///
    /// Raised for configuration parsing and filesystem errors outside the
    /// coordination substrate.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::Backend`] from any displayable cause.
    pub fn backend(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::Collaborator`] from any displayable cause.
    pub fn collaborator(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true if this error must abort the whole session.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Short machine-readable kind, used in `error` event payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Collaborator { .. } => "collaborator",
            Self::Backend { .. } => "backend",
            Self::NotFound { .. } => "not_found",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

/// Result type alias for trawl operations.
pub type Result<T> = std::result::Result<T, Error>;
