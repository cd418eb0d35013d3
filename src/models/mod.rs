//! Data models for trawl.
//!
//! Everything here is scoped to one session and travels through the event
//! log as JSON payloads.

mod events;
mod finding;
mod search;
mod thread;
mod work;

pub use events::{Action, BlobKey, ErrorPayload, Event, EventDraft, EventId, Phase, SessionId};
pub use finding::{
    Finding, FindingKind, FindingPayload, Lead, LeadAttribution, LeadPriority,
    SearchRequestPayload,
};
pub use search::{
    DiscoveredItem, ItemKind, LeadKind, SearchFilters, SearchRequest, SearchSummary,
};
pub use thread::{SessionInfo, Turn};
pub use work::{ClaimPayload, JudgeReport, JudgeVerdict, WorkItem, WorkOutcome, WorkStatus};
