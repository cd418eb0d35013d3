//! Storage backend traits.

mod blob;
mod event_log;
mod search;

pub use blob::{BlobStore, content_key, get_json, get_text, put_json, put_text};
pub use event_log::{EventFilter, EventLog};
pub use search::{SearchBackend, ThreadStore};
