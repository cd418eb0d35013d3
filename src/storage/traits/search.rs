//! External datastore traits: discovery search and thread retrieval.

use crate::Result;
use crate::models::{DiscoveredItem, SearchFilters, Turn};

/// Search backend over the development-history corpus.
///
/// Repeated calls with identical input should return overlapping or
/// identical result sets; session deduplication relies on stable item IDs.
pub trait SearchBackend: Send + Sync {
    /// Runs a query within `scope_id`, returning at most `limit` items.
    ///
    /// # Errors
    ///
    /// Any error is treated by the caller as "this request produced no new
    /// items".
    fn search(
        &self,
        query_text: &str,
        scope_id: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<DiscoveredItem>>;
}

/// Read-only conversation datastore.
pub trait ThreadStore: Send + Sync {
    /// Returns every turn of a conversation in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the datastore is unavailable.
    /// An unknown thread yields an empty list.
    fn full_thread(&self, thread_id: &str) -> Result<Vec<Turn>>;
}
