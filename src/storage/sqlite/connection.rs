//! Shared connection handling for `SQLite` backends.
//!
//! Connections are wrapped in `Mutex<Connection>` because
//! `rusqlite::Connection` is not `Sync`. WAL mode plus `busy_timeout` let the
//! event log, the blob store and the history store open separate connections
//! to the same file.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex with poison recovery.
///
/// A panic inside a previous critical section poisons the mutex; the
/// connection itself is still usable, so the guard is recovered and a warning
/// is logged.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a connection for concurrent use.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds on lock contention
///
/// # Errors
///
/// Currently infallible; pragma results are ignored because `journal_mode`
/// returns a row that `execute_batch` would reject.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    Ok(())
}

/// Opens and configures a file-backed connection, creating parent directories.
///
/// # Errors
///
/// Returns [`Error::Backend`] if the directory or database cannot be opened.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::backend("create_db_dir", format!("{}: {e}", parent.display())))?;
        }
    }
    let conn = Connection::open(path)
        .map_err(|e| Error::backend("open_sqlite", format!("{}: {e}", path.display())))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Opens a configured in-memory connection.
///
/// # Errors
///
/// Returns [`Error::Backend`] if `SQLite` cannot allocate the database.
pub fn open_in_memory() -> Result<Connection> {
    let conn =
        Connection::open_in_memory().map_err(|e| Error::backend("open_sqlite_in_memory", e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Maps a `rusqlite` error into [`Error::Backend`] for `operation`.
pub fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::backend(operation, e)
}
