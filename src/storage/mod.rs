//! Storage layer.
//!
//! Two concerns live here:
//! - **Session storage**: the append-only event log and content-keyed blob
//!   store that coordinate one exploration session ([`session`]).
//! - **History**: the read-only corpus of conversations and commits that
//!   sessions search and investigate ([`history`]).

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod history;
pub mod session;
pub mod sqlite;
pub mod traits;

pub use history::{
    CommitRecord, ConversationRecord, HistoryDocument, IngestStats, SqliteHistoryStore,
    TurnRecord,
};
pub use session::{
    InMemoryBlobStore, InMemoryEventLog, SessionBackendType, SqliteBlobStore, SqliteEventLog,
};
pub use traits::{
    BlobStore, EventFilter, EventLog, SearchBackend, ThreadStore, content_key, get_json,
    get_text, put_json, put_text,
};

/// Returns the platform data directory for trawl databases.
///
/// Falls back to `./.trawl` when no home directory can be determined.
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    directories::ProjectDirs::from("", "", "trawl").map_or_else(
        || std::path::PathBuf::from(".trawl"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
