//! Backend factory for session storage.
//!
//! Centralizes creation of the per-session event log and blob store so the
//! session API does not care which backend is configured.
//!
//! ```text
//! SessionBackendFactory
//!   ├── create(id)        → (Arc<dyn EventLog>, Arc<dyn BlobStore>)
//!   ├── open_existing(id) → same, or NotFound
//!   └── list_sessions()   → [(SessionId, event count)]
//! ```

use crate::config::TrawlConfig;
use crate::models::SessionId;
use crate::storage::sqlite::acquire_lock;
use crate::storage::{
    BlobStore, EventLog, InMemoryBlobStore, InMemoryEventLog, SessionBackendType, SqliteBlobStore,
    SqliteEventLog,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Event log and blob store of one session.
pub type SessionBackends = (Arc<dyn EventLog>, Arc<dyn BlobStore>);

/// Factory for session storage backends.
///
/// The memory backend keeps every session it creates for the lifetime of
/// the factory so [`open_existing`](Self::open_existing) can reach it.
pub struct SessionBackendFactory {
    backend: SessionBackendType,
    path: Option<PathBuf>,
    registry: Mutex<HashMap<SessionId, SessionBackends>>,
}

impl SessionBackendFactory {
    /// Factory for process-local sessions.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: SessionBackendType::Memory,
            path: None,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Factory for sessions persisted to the database at `path`.
    #[must_use]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: SessionBackendType::Sqlite,
            path: Some(path.into()),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Factory for the backend selected in `[storage]`.
    #[must_use]
    pub fn from_config(config: &TrawlConfig) -> Self {
        match config.storage.backend {
            SessionBackendType::Memory => Self::memory(),
            SessionBackendType::Sqlite => Self::sqlite(config.session_db_path()),
        }
    }

    /// The configured backend.
    #[must_use]
    pub const fn backend(&self) -> SessionBackendType {
        self.backend
    }

    /// Database path for the durable backend.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn db_path(&self) -> Result<&Path> {
        self.path().ok_or_else(|| {
            Error::InvalidInput("sqlite session backend requires a path".to_string())
        })
    }

    /// Creates storage for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the durable backend cannot be opened.
    pub fn create(&self, session_id: &SessionId) -> Result<SessionBackends> {
        let backends: SessionBackends = match self.backend {
            SessionBackendType::Memory => {
                let log: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new(session_id.clone()));
                let blobs: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
                (log, blobs)
            },
            SessionBackendType::Sqlite => {
                let path = self.db_path()?;
                ensure_parent(path)?;
                let log: Arc<dyn EventLog> =
                    Arc::new(SqliteEventLog::open(path, session_id.clone())?);
                let blobs: Arc<dyn BlobStore> =
                    Arc::new(SqliteBlobStore::open(path, session_id.clone())?);
                (log, blobs)
            },
        };
        acquire_lock(&self.registry).insert(session_id.clone(), backends.clone());
        tracing::debug!(session = %session_id, backend = %self.backend, "Created session storage");
        Ok(backends)
    }

    /// Opens the storage of a session created earlier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session is unknown to this backend,
    /// or [`Error::Backend`] if the database cannot be read.
    pub fn open_existing(&self, session_id: &SessionId) -> Result<SessionBackends> {
        if let Some(backends) = acquire_lock(&self.registry).get(session_id) {
            return Ok(backends.clone());
        }
        let not_found = || Error::NotFound {
            kind: "session",
            key: session_id.to_string(),
        };
        match self.backend {
            SessionBackendType::Memory => Err(not_found()),
            SessionBackendType::Sqlite => {
                let path = self.db_path()?;
                if !path.exists() {
                    return Err(not_found());
                }
                let log: Arc<dyn EventLog> =
                    Arc::new(SqliteEventLog::open(path, session_id.clone())?);
                if log.is_empty()? {
                    return Err(not_found());
                }
                let blobs: Arc<dyn BlobStore> =
                    Arc::new(SqliteBlobStore::open(path, session_id.clone())?);
                Ok((log, blobs))
            },
        }
    }

    /// Lists known sessions with their event counts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the database cannot be read.
    pub fn list_sessions(&self) -> Result<Vec<(SessionId, usize)>> {
        match self.backend {
            SessionBackendType::Sqlite => {
                let path = self.db_path()?;
                if !path.exists() {
                    return Ok(Vec::new());
                }
                SqliteEventLog::list_sessions(path)
            },
            SessionBackendType::Memory => {
                let registry = acquire_lock(&self.registry);
                let mut sessions = registry
                    .iter()
                    .map(|(id, (log, _))| Ok((id.clone(), log.len()?)))
                    .collect::<Result<Vec<_>>>()?;
                // UUID v7 ids sort by creation time.
                sessions.sort_by(|a, b| b.0.as_str().cmp(a.0.as_str()));
                Ok(sessions)
            },
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_session_dir".to_string(),
                cause: e.to_string(),
            })
        },
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, EventDraft, Phase};
    use crate::storage::EventFilter;
    use tempfile::TempDir;

    fn started(log: &dyn EventLog) {
        log.append(EventDraft::new("session", Phase::Seeding, Action::SessionStarted))
            .unwrap();
    }

    #[test]
    fn test_memory_registry() {
        let factory = SessionBackendFactory::memory();
        let id = SessionId::new("s-1");
        let (log, _) = factory.create(&id).unwrap();
        started(log.as_ref());

        let (reopened, _) = factory.open_existing(&id).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        assert_eq!(factory.list_sessions().unwrap(), vec![(id, 1)]);

        let err = factory.open_existing(&SessionId::new("nope")).err().unwrap();
        assert!(matches!(err, Error::NotFound { kind: "session", .. }));
    }

    #[test]
    fn test_sqlite_reopen_from_fresh_factory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        let id = SessionId::generate();
        {
            let factory = SessionBackendFactory::sqlite(&path);
            let (log, _) = factory.create(&id).unwrap();
            started(log.as_ref());
        }

        let factory = SessionBackendFactory::sqlite(&path);
        let (log, _) = factory.open_existing(&id).unwrap();
        assert_eq!(log.read(&EventFilter::all()).unwrap().len(), 1);
        assert_eq!(factory.list_sessions().unwrap().len(), 1);
        assert!(matches!(
            factory.open_existing(&SessionId::new("missing")),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_sqlite_missing_database() {
        let dir = TempDir::new().unwrap();
        let factory = SessionBackendFactory::sqlite(dir.path().join("absent.db"));
        assert!(factory.list_sessions().unwrap().is_empty());
        assert!(!dir.path().join("absent.db").exists());
    }
}
