//! `SQLite`-backed session storage.
//!
//! Persists every session's event log and blobs into one database file so a
//! run can be audited after the process exits. Each session is a partition
//! keyed by its [`SessionId`].
//!
//! # Schema
//!
//! - `session_events(session_id, seq, producer, phase, action, payload,
//!   blob_refs, causal_refs, created_at)` with primary key
//!   `(session_id, seq)`; `seq` is the [`EventId`].
//! - `session_blobs(session_id, key, name, value, created_at)` with primary
//!   key `(session_id, key)`.

use crate::models::{Action, BlobKey, Event, EventDraft, EventId, Phase, SessionId};
use crate::storage::sqlite::{acquire_lock, open_connection, open_in_memory, sql_error, timed};
use crate::storage::traits::{BlobStore, EventFilter, EventLog, content_key};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite";

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_events (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            producer TEXT NOT NULL,
            phase TEXT NOT NULL,
            action TEXT NOT NULL,
            payload TEXT NOT NULL,
            blob_refs TEXT NOT NULL,
            causal_refs TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_session_events_action
            ON session_events(session_id, action);
        CREATE TABLE IF NOT EXISTS session_blobs (
            session_id TEXT NOT NULL,
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            value BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, key)
        );",
    )
    .map_err(sql_error("create_session_tables"))
}

/// Durable event log partitioned by session.
pub struct SqliteEventLog {
    session_id: SessionId,
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteEventLog {
    /// Opens (or creates) the database at `path` for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be opened or
    /// initialized.
    pub fn open(path: impl AsRef<Path>, session_id: SessionId) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            session_id,
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory log (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be initialized.
    pub fn in_memory(session_id: SessionId) -> Result<Self> {
        let conn = open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            session_id,
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Lists the sessions stored in the database at `path`, newest first,
    /// with their event counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be read.
    pub fn list_sessions(path: impl AsRef<Path>) -> Result<Vec<(SessionId, usize)>> {
        let conn = open_connection(path.as_ref())?;
        initialize_schema(&conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, COUNT(*), MIN(created_at) AS started
                 FROM session_events
                 GROUP BY session_id
                 ORDER BY started DESC",
            )
            .map_err(sql_error("prepare_list_sessions"))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((SessionId::new(id), usize::try_from(count).unwrap_or(0)))
            })
            .map_err(sql_error("list_sessions"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("read_session_row"))
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
        Ok(RawEvent {
            seq: row.get(0)?,
            producer: row.get(1)?,
            phase: row.get(2)?,
            action: row.get(3)?,
            payload: row.get(4)?,
            blob_refs: row.get(5)?,
            causal_refs: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Event row before JSON columns are decoded.
struct RawEvent {
    seq: i64,
    producer: String,
    phase: String,
    action: String,
    payload: String,
    blob_refs: String,
    causal_refs: String,
    created_at: String,
}

impl RawEvent {
    fn decode(self) -> Result<Event> {
        let corrupt = |what: &str, detail: String| {
            Error::backend("decode_event_row", format!("seq {}: {what}: {detail}", self.seq))
        };
        let phase = Phase::parse(&self.phase)
            .ok_or_else(|| corrupt("phase", self.phase.clone()))?;
        let action = Action::parse(&self.action)
            .ok_or_else(|| corrupt("action", self.action.clone()))?;
        let payload =
            serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", e.to_string()))?;
        let blob_refs = serde_json::from_str(&self.blob_refs)
            .map_err(|e| corrupt("blob_refs", e.to_string()))?;
        let causal_refs = serde_json::from_str(&self.causal_refs)
            .map_err(|e| corrupt("causal_refs", e.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt("created_at", e.to_string()))?
            .with_timezone(&Utc);
        Ok(Event {
            id: EventId::new(u64::try_from(self.seq).unwrap_or(0)),
            producer: self.producer,
            phase,
            action,
            payload,
            blob_refs,
            causal_refs,
            timestamp,
        })
    }
}

fn encode_json<T: serde::Serialize>(value: &T, what: &'static str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::backend(what, e))
}

impl EventLog for SqliteEventLog {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[instrument(skip(self, draft), fields(operation = "append", backend = BACKEND, session = %self.session_id, action = %draft.action))]
    fn append(&self, draft: EventDraft) -> Result<EventId> {
        timed(BACKEND, "append", || {
            let payload = encode_json(&draft.payload, "encode_payload")?;
            let blob_refs = encode_json(&draft.blob_refs, "encode_blob_refs")?;
            let causal_refs = encode_json(&draft.causal_refs, "encode_causal_refs")?;
            let now = Utc::now();

            let conn = acquire_lock(&self.conn);
            // IMMEDIATE takes the write lock up front so MAX(seq) cannot be
            // read by another connection between the select and the insert.
            conn.execute("BEGIN IMMEDIATE", [])
                .map_err(sql_error("begin_transaction"))?;

            let result = (|| {
                let seq: i64 = conn
                    .query_row(
                        "SELECT COALESCE(MAX(seq), 0) + 1 FROM session_events WHERE session_id = ?1",
                        params![self.session_id.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(sql_error("next_seq"))?;
                conn.execute(
                    "INSERT INTO session_events
                        (session_id, seq, producer, phase, action, payload, blob_refs, causal_refs, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        self.session_id.as_str(),
                        seq,
                        draft.producer,
                        draft.phase.as_str(),
                        draft.action.as_str(),
                        payload,
                        blob_refs,
                        causal_refs,
                        now.to_rfc3339(),
                    ],
                )
                .map_err(sql_error("insert_event"))?;
                Ok(EventId::new(u64::try_from(seq).unwrap_or(0)))
            })();

            if result.is_ok() {
                conn.execute("COMMIT", []).map_err(sql_error("commit_transaction"))?;
            } else {
                let _ = conn.execute("ROLLBACK", []);
            }
            result
        })
    }

    #[instrument(skip(self, filter), fields(operation = "read", backend = BACKEND, session = %self.session_id))]
    fn read(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        timed(BACKEND, "read", || {
            let after = filter
                .after
                .map_or(0, |id| i64::try_from(id.value()).unwrap_or(i64::MAX));
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare_cached(
                    "SELECT seq, producer, phase, action, payload, blob_refs, causal_refs, created_at
                     FROM session_events
                     WHERE session_id = ?1 AND seq > ?2
                     ORDER BY seq",
                )
                .map_err(sql_error("prepare_read_events"))?;
            let rows = stmt
                .query_map(params![self.session_id.as_str(), after], Self::row_to_event)
                .map_err(sql_error("read_events"))?;

            let mut events = Vec::new();
            for row in rows {
                let event = row.map_err(sql_error("read_event_row"))?.decode()?;
                if filter.matches(&event) {
                    events.push(event);
                }
            }
            Ok(events)
        })
    }

    fn last_id(&self) -> Result<Option<EventId>> {
        let conn = acquire_lock(&self.conn);
        let seq: Option<i64> = conn
            .query_row(
                "SELECT MAX(seq) FROM session_events WHERE session_id = ?1",
                params![self.session_id.as_str()],
                |row| row.get(0),
            )
            .map_err(sql_error("last_event_id"))?;
        Ok(seq.and_then(|s| u64::try_from(s).ok()).map(EventId::new))
    }
}

/// Durable blob store partitioned by session.
pub struct SqliteBlobStore {
    session_id: SessionId,
    conn: Mutex<Connection>,
}

impl SqliteBlobStore {
    /// Opens (or creates) the database at `path` for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be opened or
    /// initialized.
    pub fn open(path: impl AsRef<Path>, session_id: SessionId) -> Result<Self> {
        let conn = open_connection(path.as_ref())?;
        initialize_schema(&conn)?;
        Ok(Self {
            session_id,
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be initialized.
    pub fn in_memory(session_id: SessionId) -> Result<Self> {
        let conn = open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            session_id,
            conn: Mutex::new(conn),
        })
    }
}

impl BlobStore for SqliteBlobStore {
    #[instrument(skip(self, value), fields(operation = "put", backend = BACKEND, name = name, size = value.len()))]
    fn put(&self, name: &str, value: &[u8]) -> Result<BlobKey> {
        timed(BACKEND, "put_blob", || {
            let key = content_key(name, value);
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT OR IGNORE INTO session_blobs (session_id, key, name, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    self.session_id.as_str(),
                    key.as_str(),
                    name,
                    value,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(sql_error("insert_blob"))?;
            Ok(key)
        })
    }

    #[instrument(skip(self), fields(operation = "get", backend = BACKEND, key = %key))]
    fn get(&self, key: &BlobKey) -> Result<Vec<u8>> {
        timed(BACKEND, "get_blob", || {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT value FROM session_blobs WHERE session_id = ?1 AND key = ?2",
                params![self.session_id.as_str(), key.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(sql_error("get_blob"))?
            .ok_or_else(|| Error::NotFound {
                kind: "blob",
                key: key.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Phase;

    fn draft(action: Action) -> EventDraft {
        EventDraft::new("router", Phase::Search, action)
    }

    #[test]
    fn test_append_and_read_back() {
        let log = SqliteEventLog::in_memory(SessionId::new("s1")).unwrap();
        let first = log
            .append(draft(Action::RequestSearch).with_json(serde_json::json!({"q": "why"})))
            .unwrap();
        let second = log
            .append(
                draft(Action::SearchComplete)
                    .caused_by(first)
                    .with_blob("results", BlobKey::new("results/abc")),
            )
            .unwrap();
        assert_eq!(first, EventId::new(1));
        assert_eq!(second, EventId::new(2));

        let events = log.read(&EventFilter::all()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["q"], "why");
        assert!(events[1].references(first));
        assert_eq!(
            events[1].blob("results").map(BlobKey::as_str),
            Some("results/abc")
        );
        assert_eq!(log.last_id().unwrap(), Some(second));
    }

    #[test]
    fn test_sessions_are_partitioned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        let a = SqliteEventLog::open(&path, SessionId::new("a")).unwrap();
        let b = SqliteEventLog::open(&path, SessionId::new("b")).unwrap();
        a.append(draft(Action::RequestSearch)).unwrap();
        a.append(draft(Action::SearchComplete)).unwrap();
        let first_b = b.append(draft(Action::RequestSearch)).unwrap();

        assert_eq!(first_b, EventId::new(1));
        assert_eq!(a.len().unwrap(), 2);
        assert_eq!(b.len().unwrap(), 1);

        let sessions = SqliteEventLog::list_sessions(&path).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&(SessionId::new("a"), 2)));
    }

    #[test]
    fn test_reopen_preserves_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let log = SqliteEventLog::open(&path, SessionId::new("keep")).unwrap();
            log.append(draft(Action::RequestSearch)).unwrap();
        }
        let reopened = SqliteEventLog::open(&path, SessionId::new("keep")).unwrap();
        let next = reopened.append(draft(Action::SearchComplete)).unwrap();
        assert_eq!(next, EventId::new(2));
    }

    #[test]
    fn test_read_after_filter_is_pushed_down() {
        let log = SqliteEventLog::in_memory(SessionId::new("s")).unwrap();
        for _ in 0..5 {
            log.append(draft(Action::RequestSearch)).unwrap();
        }
        let tail = log.read(&EventFilter::after(EventId::new(3))).unwrap();
        let ids: Vec<u64> = tail.iter().map(|e| e.id.value()).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_blob_store_roundtrip() {
        let store = SqliteBlobStore::in_memory(SessionId::new("s")).unwrap();
        let key = store.put("answer", b"draft one").unwrap();
        assert_eq!(store.get(&key).unwrap(), b"draft one");
        assert_eq!(store.put("answer", b"draft one").unwrap(), key);
        assert!(matches!(
            store.get(&BlobKey::new("answer/missing")),
            Err(Error::NotFound { .. })
        ));
    }
}
