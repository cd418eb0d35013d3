//! Per-session event log and blob store backends.
//!
//! | Backend | Type | Lifetime |
//! |---------|------|----------|
//! | `memory` | [`InMemoryEventLog`], [`InMemoryBlobStore`] | Process |
//! | `sqlite` | [`SqliteEventLog`], [`SqliteBlobStore`] | Database file, auditable |

mod memory;
mod sqlite;

pub use memory::{InMemoryBlobStore, InMemoryEventLog};
pub use sqlite::{SqliteBlobStore, SqliteEventLog};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendType {
    /// Process-local, discarded on exit.
    #[default]
    Memory,
    /// `SQLite` database, kept for audit.
    Sqlite,
}

impl SessionBackendType {
    /// Returns the backend name as used in config files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for SessionBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
