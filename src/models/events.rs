//! Event log records.
//!
//! Every coordination step of a session is an [`Event`] appended to the
//! session's log. Events are immutable once appended; the log assigns the
//! [`EventId`], which is the only ordering primitive.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Identifier assigned by the log in append order, starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Creates an event ID from its sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of one exploration session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, time-ordered session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key of a value in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(String);

impl BlobKey {
    /// Wraps an existing key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse stage of the exploration loop that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Session setup.
    Seeding,
    /// Discovery search.
    Search,
    /// Relevance judging.
    Judge,
    /// Worker investigation.
    Work,
    /// Answer synthesis.
    Synthesis,
}

impl Phase {
    /// Returns the phase as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seeding => "seeding",
            Self::Search => "search",
            Self::Judge => "judge",
            Self::Work => "work",
            Self::Synthesis => "synthesis",
        }
    }

    /// Parses a phase from its string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "seeding" => Some(Self::Seeding),
            "search" => Some(Self::Search),
            "judge" => Some(Self::Judge),
            "work" => Some(Self::Work),
            "synthesis" => Some(Self::Synthesis),
            _ => None,
        }
    }
}

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A session was opened with its query and scope.
    SessionStarted,
    /// A search should run in the next iteration.
    RequestSearch,
    /// A search request was executed.
    SearchComplete,
    /// One judge scored its batch.
    JudgeComplete,
    /// An admitted item entered the work queue.
    AddToQueue,
    /// A worker took ownership of a queued item.
    ClaimWork,
    /// A worker finished (or gave up on) a claimed item.
    WorkComplete,
    /// A worker emitted a finding.
    Finding,
    /// The synthesizer replaced its draft answer.
    SynthesisUpdate,
    /// The synthesizer produced its terminal answer.
    Finalized,
    /// A unit of work failed locally.
    Error,
}

impl Action {
    /// Returns the action as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::RequestSearch => "request_search",
            Self::SearchComplete => "search_complete",
            Self::JudgeComplete => "judge_complete",
            Self::AddToQueue => "add_to_queue",
            Self::ClaimWork => "claim_work",
            Self::WorkComplete => "work_complete",
            Self::Finding => "finding",
            Self::SynthesisUpdate => "synthesis_update",
            Self::Finalized => "finalized",
            Self::Error => "error",
        }
    }

    /// Parses an action from its string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_started" => Some(Self::SessionStarted),
            "request_search" => Some(Self::RequestSearch),
            "search_complete" => Some(Self::SearchComplete),
            "judge_complete" => Some(Self::JudgeComplete),
            "add_to_queue" => Some(Self::AddToQueue),
            "claim_work" => Some(Self::ClaimWork),
            "work_complete" => Some(Self::WorkComplete),
            "finding" => Some(Self::Finding),
            "synthesis_update" => Some(Self::SynthesisUpdate),
            "finalized" => Some(Self::Finalized),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record in a session's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Log-assigned position.
    pub id: EventId,
    /// Component instance that appended the event (`router`, `judge-1`, `worker-3`).
    pub producer: String,
    /// Loop stage.
    pub phase: Phase,
    /// What happened.
    pub action: Action,
    /// Small structured payload. Bulky data goes to `blob_refs`.
    pub payload: serde_json::Value,
    /// Named references into the blob store.
    #[serde(default)]
    pub blob_refs: BTreeMap<String, BlobKey>,
    /// Prior events this one depends on.
    #[serde(default)]
    pub causal_refs: Vec<EventId>,
    /// Wall-clock time of the append. Informational only.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Deserializes the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the payload does not match `T`; a log
    /// holding payloads its own producers cannot read is corrupt.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::backend(
                "decode_event_payload",
                format!("{} {}: {e}", self.action, self.id),
            )
        })
    }

    /// Returns true if `other` is listed in this event's causal references.
    #[must_use]
    pub fn references(&self, other: EventId) -> bool {
        self.causal_refs.contains(&other)
    }

    /// Returns the blob key stored under `name`, if any.
    #[must_use]
    pub fn blob(&self, name: &str) -> Option<&BlobKey> {
        self.blob_refs.get(name)
    }
}

/// An event before the log has assigned its ID and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    /// Producer name.
    pub producer: String,
    /// Loop stage.
    pub phase: Phase,
    /// What happened.
    pub action: Action,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Named blob references.
    pub blob_refs: BTreeMap<String, BlobKey>,
    /// Causal references.
    pub causal_refs: Vec<EventId>,
}

impl EventDraft {
    /// Starts a draft with an empty payload.
    #[must_use]
    pub fn new(producer: impl Into<String>, phase: Phase, action: Action) -> Self {
        Self {
            producer: producer.into(),
            phase,
            action,
            payload: serde_json::Value::Null,
            blob_refs: BTreeMap::new(),
            causal_refs: Vec::new(),
        }
    }

    /// Serializes `payload` into the draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the payload cannot be serialized.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = serde_json::to_value(payload).map_err(|e| {
            Error::InvalidInput(format!("unserializable {} payload: {e}", self.action))
        })?;
        Ok(self)
    }

    /// Sets a raw JSON payload.
    #[must_use]
    pub fn with_json(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a named blob reference.
    #[must_use]
    pub fn with_blob(mut self, name: impl Into<String>, key: BlobKey) -> Self {
        self.blob_refs.insert(name.into(), key);
        self
    }

    /// Adds a causal reference.
    #[must_use]
    pub fn caused_by(mut self, id: EventId) -> Self {
        if !self.causal_refs.contains(&id) {
            self.causal_refs.push(id);
        }
        self
    }

    /// Materializes the draft with its log-assigned identity.
    #[must_use]
    pub fn into_event(self, id: EventId, timestamp: DateTime<Utc>) -> Event {
        Event {
            id,
            producer: self.producer,
            phase: self.phase,
            action: self.action,
            payload: self.payload,
            blob_refs: self.blob_refs,
            causal_refs: self.causal_refs,
            timestamp,
        }
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Unit that failed (`search`, `judge`, `investigate`, `synthesize`).
    pub unit: String,
    /// Error kind, see [`Error::kind`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Item the failure is scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Number of results produced by the failed unit (always zero).
    #[serde(default)]
    pub result_count: usize,
}

impl ErrorPayload {
    /// Builds the payload for a failed unit.
    #[must_use]
    pub fn new(unit: impl Into<String>, error: &Error) -> Self {
        Self {
            unit: unit.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            item_id: None,
            result_count: 0,
        }
    }

    /// Scopes the failure to one item.
    #[must_use]
    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_roundtrip() {
        for action in [
            Action::SessionStarted,
            Action::RequestSearch,
            Action::SearchComplete,
            Action::JudgeComplete,
            Action::AddToQueue,
            Action::ClaimWork,
            Action::WorkComplete,
            Action::Finding,
            Action::SynthesisUpdate,
            Action::Finalized,
            Action::Error,
        ] {
            assert_eq!(Action::parse(action.as_str()), Some(action));
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
        assert_eq!(Action::parse("unknown"), None);
    }

    #[test]
    fn test_draft_dedups_causal_refs() {
        let draft = EventDraft::new("worker-1", Phase::Work, Action::ClaimWork)
            .caused_by(EventId::new(3))
            .caused_by(EventId::new(3))
            .caused_by(EventId::new(5));
        assert_eq!(draft.causal_refs, vec![EventId::new(3), EventId::new(5)]);
    }

    #[test]
    fn test_decode_payload() {
        let payload = ErrorPayload::new("search", &Error::collaborator("search", "timeout"));
        let event = EventDraft::new("router", Phase::Search, Action::Error)
            .with_payload(&payload)
            .unwrap()
            .into_event(EventId::new(1), Utc::now());

        let decoded: ErrorPayload = event.decode().unwrap();
        assert_eq!(decoded.kind, "collaborator");
        assert_eq!(decoded.result_count, 0);

        let wrong: Result<Vec<u32>> = event.decode();
        assert!(matches!(wrong, Err(Error::Backend { .. })));
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId::new(2) > EventId::new(1));
        assert_eq!(EventId::new(7).to_string(), "#7");
    }
}
