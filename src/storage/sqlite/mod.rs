//! Shared `SQLite` infrastructure for storage backends.
//!
//! Used by the durable session backends ([`crate::storage::session`]) and the
//! history datastore ([`crate::storage::history`]). Each backend keeps its own
//! connection; WAL mode makes that cheap.

mod connection;
mod metrics;

pub use connection::{
    acquire_lock, configure_connection, open_connection, open_in_memory, sql_error,
};
pub use metrics::{record_operation_metrics, timed};
