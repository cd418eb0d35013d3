//! Judge verdicts and work queue records.

use serde::{Deserialize, Serialize};

use super::EventId;

/// Relevance score given to one discovered item by a judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// The scored item.
    pub item_id: String,
    /// Score in `[0, 10]`.
    pub score: f32,
    /// Short justification.
    #[serde(default)]
    pub rationale: String,
}

impl JudgeVerdict {
    /// Highest score a judge may assign.
    pub const MAX_SCORE: f32 = 10.0;

    /// Returns true if the score lies in `[0, 10]`.
    #[must_use]
    pub fn is_in_range(&self) -> bool {
        (0.0..=Self::MAX_SCORE).contains(&self.score)
    }
}

/// Payload of a `judge_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    /// Iteration the batch was judged in.
    pub iteration: u32,
    /// Zero-based judge index within the iteration.
    pub judge: usize,
    /// One verdict per item in the batch.
    pub verdicts: Vec<JudgeVerdict>,
    /// How many verdicts met the admission threshold.
    pub admitted: usize,
}

/// An admitted item waiting in the work queue.
///
/// Recorded as the payload of an `add_to_queue` event. The queue itself is
/// never stored; it is derived from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Discovered item identity.
    pub item_id: String,
    /// Conversation to investigate.
    pub thread_id: String,
    /// Equal to the judge score.
    pub priority: f32,
    /// The `search_complete` event that surfaced the item.
    pub origin_event_id: EventId,
    /// Iteration the item was admitted in.
    pub iteration: u32,
    /// Always false when enqueued; claim state lives in `claim_work` events.
    #[serde(default)]
    pub claimed: bool,
}

/// Payload of a `claim_work` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPayload {
    /// Claimed item identity.
    pub item_id: String,
    /// Claimed thread identity.
    pub thread_id: String,
    /// The `add_to_queue` event being consumed.
    pub queue_event_id: EventId,
    /// Claiming worker.
    pub worker: String,
}

/// Terminal status of one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Every turn was analyzed.
    Completed,
    /// Investigation stopped on a collaborator error.
    Failed,
}

/// Payload of a `work_complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOutcome {
    /// Investigated item.
    pub item_id: String,
    /// Terminal status.
    pub status: WorkStatus,
    /// Turns analyzed before finishing or failing.
    pub turns_analyzed: usize,
    /// Findings emitted for the item.
    pub findings: usize,
    /// Search requests emitted for the item.
    pub leads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_range() {
        let mut verdict = JudgeVerdict {
            item_id: "turn:c1:0".to_string(),
            score: 7.0,
            rationale: String::new(),
        };
        assert!(verdict.is_in_range());
        verdict.score = 10.5;
        assert!(!verdict.is_in_range());
        verdict.score = -0.1;
        assert!(!verdict.is_in_range());
    }

    #[test]
    fn test_work_item_claimed_defaults_false() {
        let json = r#"{"item_id":"a","thread_id":"t","priority":8.0,"origin_event_id":4,"iteration":0}"#;
        let item: WorkItem = serde_json::from_str(json).unwrap();
        assert!(!item.claimed);
        assert_eq!(item.origin_event_id, EventId::new(4));
    }
}
