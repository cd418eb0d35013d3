//! Event log trait.
//!
//! The event log is the single source of truth for a session. Every derived
//! view (work queue, pending searches, processed items) is recomputed by
//! scanning [`EventLog::read`] output; there is no materialized index.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Durability |
//! |---------|----------|------------|
//! | `InMemoryEventLog` | Tests, one-shot runs | Process lifetime |
//! | `SqliteEventLog` | Audited runs | File-backed, WAL |
//!
//! # Guarantees
//!
//! - IDs are assigned in append order, start at 1 and never repeat within a
//!   session.
//! - Events from one producer are read back in the order that producer
//!   appended them.
//! - A failed append returns an error; nothing is silently dropped.

use crate::Result;
use crate::models::{Action, Event, EventDraft, EventId, SessionId};

/// Restricts which events [`EventLog::read`] returns.
///
/// An empty filter returns the whole log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events from this producer.
    pub producer: Option<String>,
    /// Only events with an ID strictly greater than this one.
    pub after: Option<EventId>,
    /// Only events with one of these actions (empty means all).
    pub actions: Vec<Action>,
}

impl EventFilter {
    /// Matches every event.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            producer: None,
            after: None,
            actions: Vec::new(),
        }
    }

    /// Matches events after `id`.
    #[must_use]
    pub const fn after(id: EventId) -> Self {
        Self {
            producer: None,
            after: Some(id),
            actions: Vec::new(),
        }
    }

    /// Matches events with any of the given actions.
    #[must_use]
    pub fn actions(actions: &[Action]) -> Self {
        Self {
            producer: None,
            after: None,
            actions: actions.to_vec(),
        }
    }

    /// Restricts to one producer.
    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Restricts to events after `id`.
    #[must_use]
    pub const fn with_after(mut self, id: EventId) -> Self {
        self.after = Some(id);
        self
    }

    /// Returns true if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(after) = self.after {
            if event.id <= after {
                return false;
            }
        }
        if let Some(producer) = &self.producer {
            if &event.producer != producer {
                return false;
            }
        }
        self.actions.is_empty() || self.actions.contains(&event.action)
    }
}

/// Trait for append-only session event logs.
///
/// # Implementor Notes
///
/// - Methods take `&self` so a log can be shared via `Arc<dyn EventLog>`
///   between workers, judges and the synthesizer.
/// - `append` must assign the ID atomically with the write.
/// - `read` must return events sorted by ID.
pub trait EventLog: Send + Sync {
    /// The session this log belongs to.
    fn session_id(&self) -> &SessionId;

    /// Appends an event and returns its assigned ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the write fails.
    fn append(&self, draft: EventDraft) -> Result<EventId>;

    /// Reads events matching `filter`, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the read fails.
    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Returns the ID of the most recent event, if any.
    fn last_id(&self) -> Result<Option<EventId>> {
        Ok(self.read(&EventFilter::all())?.last().map(|e| e.id))
    }

    /// Returns the number of events in the log.
    fn len(&self) -> Result<usize> {
        Ok(self.read(&EventFilter::all())?.len())
    }

    /// Returns true if nothing has been appended yet.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
