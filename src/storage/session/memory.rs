//! In-memory session backends.
//!
//! Process-local and discarded with the session. Suitable for tests and for
//! runs that do not need an audit trail after exit.

use crate::models::{BlobKey, Event, EventDraft, EventId, SessionId};
use crate::storage::sqlite::{acquire_lock, timed};
use crate::storage::traits::{BlobStore, EventFilter, EventLog, content_key};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Event log held in a `Vec` behind a mutex.
///
/// The mutex is held only for the duration of a single append or read; no
/// lock spans a caller's read-then-append sequence.
pub struct InMemoryEventLog {
    session_id: SessionId,
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventLog {
    /// Creates an empty log for `session_id`.
    #[must_use]
    pub const fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            events: Mutex::new(Vec::new()),
        }
    }
}

impl EventLog for InMemoryEventLog {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn append(&self, draft: EventDraft) -> Result<EventId> {
        timed("memory", "append", || {
            let mut events = acquire_lock(&self.events);
            let id = EventId::new(events.len() as u64 + 1);
            tracing::trace!(
                session = %self.session_id,
                event = %id,
                action = %draft.action,
                producer = %draft.producer,
                "Appended event"
            );
            events.push(draft.into_event(id, Utc::now()));
            Ok(id)
        })
    }

    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        timed("memory", "read", || {
            let events = acquire_lock(&self.events);
            // IDs are dense from 1, so `after` maps straight to a slice offset.
            let start = filter
                .after
                .map_or(0, |after| usize::try_from(after.value()).unwrap_or(usize::MAX))
                .min(events.len());
            Ok(events[start..]
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .collect())
        })
    }

    fn last_id(&self) -> Result<Option<EventId>> {
        Ok(acquire_lock(&self.events).last().map(|e| e.id))
    }

    fn len(&self) -> Result<usize> {
        Ok(acquire_lock(&self.events).len())
    }
}

/// Blob store held in a `HashMap` behind a mutex.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<BlobKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.blobs).len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, name: &str, value: &[u8]) -> Result<BlobKey> {
        let key = content_key(name, value);
        acquire_lock(&self.blobs)
            .entry(key.clone())
            .or_insert_with(|| value.to_vec());
        Ok(key)
    }

    fn get(&self, key: &BlobKey) -> Result<Vec<u8>> {
        acquire_lock(&self.blobs)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "blob",
                key: key.to_string(),
            })
    }
}
