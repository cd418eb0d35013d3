//! The reasoning collaborator contract and its LLM-backed implementation.

use super::prompts::{
    ANALYZE_SYSTEM_PROMPT, FINALIZE_SYSTEM_PROMPT, JUDGE_SYSTEM_PROMPT, SYNTHESIZE_SYSTEM_PROMPT,
    analyze_prompt, finalize_prompt, judge_prompt, synthesize_prompt, system_prompt,
};
use super::{LlmProvider, parse_json_reply};
use crate::models::{
    DiscoveredItem, Finding, FindingKind, JudgeVerdict, Lead, LeadKind, LeadPriority, Turn,
};
use crate::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Input for analyzing one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnAnalysisRequest<'a> {
    /// The user's question.
    pub query: &'a str,
    /// The turn being analyzed.
    pub turn: &'a Turn,
    /// Turns before it in the same thread.
    pub prior_turns: &'a [Turn],
    /// Recent findings emitted by other workers.
    pub peer_findings: &'a [Finding],
}

/// Result of analyzing one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnAnalysis {
    /// Evidence extracted from the turn.
    pub findings: Vec<Finding>,
    /// Follow-up searches proposed by the turn.
    pub leads: Vec<Lead>,
}

/// Input for one synthesis tick.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    /// The user's question.
    pub query: &'a str,
    /// Current draft, if any.
    pub draft: Option<&'a str>,
    /// Findings not yet folded into the draft.
    pub new_findings: &'a [Finding],
    /// Findings seen so far, including the new ones.
    pub total_findings: usize,
}

/// Input for finalization.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeRequest<'a> {
    /// The user's question.
    pub query: &'a str,
    /// Latest draft.
    pub draft: &'a str,
    /// Every finding emitted in the session, in log order.
    pub findings: &'a [Finding],
    /// Findings seen over the whole session.
    pub total_findings: usize,
}

/// External reasoning used by the exploration pipeline.
///
/// Implementations are called concurrently from judge, worker and
/// synthesizer threads. Every failure, including a reply that cannot be
/// parsed, is reported as [`Error::Collaborator`] so callers can record it
/// and carry on.
pub trait Collaborator: Send + Sync {
    /// Scores each item's relevance to `query` on `[0, 10]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the call or parsing fails.
    fn score_items(&self, query: &str, items: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>>;

    /// Extracts findings and leads from one turn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the call or parsing fails.
    fn analyze_turn(&self, request: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis>;

    /// Folds new findings into the running draft, returning the new draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the call or parsing fails.
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String>;

    /// Produces the final answer from the last draft and all findings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collaborator`] if the call or parsing fails.
    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<String>;
}

impl<C: Collaborator + ?Sized> Collaborator for Arc<C> {
    fn score_items(&self, query: &str, items: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>> {
        (**self).score_items(query, items)
    }

    fn analyze_turn(&self, request: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis> {
        (**self).analyze_turn(request)
    }

    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String> {
        (**self).synthesize(request)
    }

    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<String> {
        (**self).finalize(request)
    }
}

/// Judge reply: either `{"verdicts": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JudgeReply {
    Wrapped { verdicts: Vec<JudgeVerdict> },
    Bare(Vec<JudgeVerdict>),
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    leads: Vec<RawLead>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    kind: String,
    summary: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    related_entities: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawLead {
    kind: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    search_query_text: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    priority: String,
}

#[derive(Debug, Deserialize)]
struct AnswerReply {
    answer: String,
}

fn parse_finding_kind(s: &str) -> FindingKind {
    match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
        "decision" => FindingKind::Decision,
        "problem" | "issue" | "bug" => FindingKind::Problem,
        "solution" | "fix" => FindingKind::Solution,
        "technical_detail" | "detail" | "technical" => FindingKind::TechnicalDetail,
        _ => FindingKind::Context,
    }
}

fn parse_priority(s: &str) -> LeadPriority {
    match s.trim().to_lowercase().as_str() {
        "high" => LeadPriority::High,
        "low" => LeadPriority::Low,
        _ => LeadPriority::Medium,
    }
}

impl AnalysisReply {
    /// Converts the raw reply, dropping findings without a summary and leads
    /// with an unknown kind or nothing to search for.
    fn into_analysis(self) -> TurnAnalysis {
        let findings = self
            .findings
            .into_iter()
            .filter(|f| !f.summary.trim().is_empty())
            .map(|f| {
                Finding {
                    kind: parse_finding_kind(&f.kind),
                    summary: f.summary.trim().to_string(),
                    detail: f.detail,
                    related_entities: f.related_entities,
                    source_item_id: String::new(),
                    confidence: f.confidence.unwrap_or(0.5),
                }
                .normalized()
            })
            .collect();

        let leads = self
            .leads
            .into_iter()
            .filter_map(|raw| {
                let kind = LeadKind::parse(&raw.kind)?;
                let search_query_text = if raw.search_query_text.trim().is_empty() {
                    raw.value.trim().to_string()
                } else {
                    raw.search_query_text.trim().to_string()
                };
                if search_query_text.is_empty() {
                    return None;
                }
                Some(Lead {
                    kind,
                    value: raw.value.trim().to_string(),
                    search_query_text,
                    rationale: raw.rationale,
                    priority: parse_priority(&raw.priority),
                })
            })
            .collect();

        TurnAnalysis { findings, leads }
    }
}

/// [`Collaborator`] backed by an [`LlmProvider`].
pub struct LlmCollaborator<P: LlmProvider + ?Sized> {
    provider: Arc<P>,
}

impl<P: LlmProvider + ?Sized> LlmCollaborator<P> {
    /// Wraps a provider.
    #[must_use]
    pub const fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    fn ask(&self, system: &str, user: &str) -> Result<String> {
        self.provider
            .complete_with_system(&system_prompt(system), user)
            .map_err(|e| match e {
                Error::Collaborator { .. } => e,
                other => Error::collaborator(self.provider.name(), other),
            })
    }

    fn answer(operation: &str, reply: &str) -> Result<String> {
        let parsed: AnswerReply = parse_json_reply(operation, reply)?;
        let answer = parsed.answer.trim();
        if answer.is_empty() {
            return Err(Error::collaborator(operation, "empty answer"));
        }
        Ok(answer.to_string())
    }
}

impl<P: LlmProvider + ?Sized> Collaborator for LlmCollaborator<P> {
    #[instrument(skip_all, fields(provider = self.provider.name(), items = items.len()))]
    fn score_items(&self, query: &str, items: &[DiscoveredItem]) -> Result<Vec<JudgeVerdict>> {
        let reply = self.ask(JUDGE_SYSTEM_PROMPT, &judge_prompt(query, items))?;
        Ok(match parse_json_reply::<JudgeReply>("score_items", &reply)? {
            JudgeReply::Wrapped { verdicts } | JudgeReply::Bare(verdicts) => verdicts,
        })
    }

    #[instrument(skip_all, fields(provider = self.provider.name(), thread = %request.turn.thread_id, turn = request.turn.index))]
    fn analyze_turn(&self, request: &TurnAnalysisRequest<'_>) -> Result<TurnAnalysis> {
        let prompt = analyze_prompt(
            request.query,
            request.turn,
            request.prior_turns,
            request.peer_findings,
        );
        let reply = self.ask(ANALYZE_SYSTEM_PROMPT, &prompt)?;
        let parsed: AnalysisReply = parse_json_reply("analyze_turn", &reply)?;
        Ok(parsed.into_analysis())
    }

    #[instrument(skip_all, fields(provider = self.provider.name(), new_findings = request.new_findings.len()))]
    fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String> {
        let prompt = synthesize_prompt(
            request.query,
            request.draft,
            request.new_findings,
            request.total_findings,
        );
        let reply = self.ask(SYNTHESIZE_SYSTEM_PROMPT, &prompt)?;
        Self::answer("synthesize", &reply)
    }

    #[instrument(skip_all, fields(provider = self.provider.name(), findings = request.findings.len()))]
    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<String> {
        let prompt = finalize_prompt(request.query, request.draft, request.findings);
        let reply = self.ask(FINALIZE_SYSTEM_PROMPT, &prompt)?;
        Self::answer("finalize", &reply)
    }
}
