//! Response review: a weighted rubric over the draft answer.
//!
//! The model scores three criteria from 0 to 100; the weighted total and the
//! approval decision are computed locally so the rubric weights stay under
//! the caller's control.

use crate::agent::harness::AgentTranscript;
use crate::agent::history::{ConversationTurn, history_summary};
use crate::api::model::{LanguageModel, call_model, json_request, parse_json_reply};
use crate::config::ReviewConfig;
use crate::corpus::UserContext;
use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

pub const REVIEWER_SYSTEM_PROMPT: &str = "You review answers written by a research \
assistant that works over a corpus of structured records. Score the draft on three \
criteria, each from 0 to 100: format (clear structure, readable, answers in the user's \
language), completeness (covers every part of the question with the relevant records), \
justification (claims are grounded in cited records and the reasoning is explicit). List \
concrete issues and actionable suggestions. Reply with a JSON object: {\"format\": number, \
\"completeness\": number, \"justification\": number, \"issues\": [string], \
\"suggestions\": [string], \"feedback\": string}.";

/// History turns shown to the reviewer.
const REVIEW_HISTORY_TURNS: usize = 4;
const REVIEW_HISTORY_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    NeedsImprovement,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::NeedsImprovement => write!(f, "needs_improvement"),
        }
    }
}

/// The reviewer's judgement of one draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewVerdict {
    pub status: ReviewStatus,
    /// Weighted score, 0-100.
    pub score: f64,
    pub format: f64,
    pub completeness: f64,
    pub justification: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub feedback: String,
    /// False when the reviewer could not be reached and this verdict is a
    /// placeholder.
    pub reviewed: bool,
}

impl ReviewVerdict {
    /// Placeholder verdict used when the review call fails.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            status: ReviewStatus::NeedsImprovement,
            score: 0.0,
            format: 0.0,
            completeness: 0.0,
            justification: 0.0,
            issues: Vec::new(),
            suggestions: vec![
                "Re-check the answer against the question and cite the records it relies on."
                    .into(),
            ],
            feedback: format!("review unavailable: {}", reason.into()),
            reviewed: false,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }
}

#[derive(Debug, Deserialize)]
struct RubricReply {
    format: f64,
    completeness: f64,
    justification: f64,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    feedback: String,
}

/// What the reviewer sees.
pub struct ReviewInput<'a> {
    pub query: &'a str,
    pub history: &'a [ConversationTurn],
    pub draft: &'a AgentTranscript,
    pub user_context: Option<&'a UserContext>,
}

pub struct ResponseReviewer<'a> {
    model: &'a dyn LanguageModel,
    config: &'a ReviewConfig,
}

impl<'a> ResponseReviewer<'a> {
    pub fn new(model: &'a dyn LanguageModel, config: &'a ReviewConfig) -> Self {
        Self { model, config }
    }

    pub async fn review(&self, input: &ReviewInput<'_>) -> Result<ReviewVerdict, ProviderError> {
        let request = json_request(
            &self.config.model,
            REVIEWER_SYSTEM_PROMPT,
            render_prompt(input),
            self.config.max_tokens,
            0.0,
        );
        let completion = call_model(self.model, &request, self.config.model_timeout()).await?;
        let reply: RubricReply = parse_json_reply(&completion)?;
        let verdict = self.score(reply);
        debug!(
            "Review scores: format={:.0} completeness={:.0} justification={:.0} -> {:.1}",
            verdict.format, verdict.completeness, verdict.justification, verdict.score
        );
        Ok(verdict)
    }

    /// [`review`](Self::review), replaced by [`ReviewVerdict::unavailable`]
    /// on failure.
    pub async fn review_or_fallback(&self, input: &ReviewInput<'_>) -> ReviewVerdict {
        match self.review(input).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Review failed, continuing with a placeholder verdict: {e}");
                ReviewVerdict::unavailable(e.to_string())
            }
        }
    }

    fn score(&self, reply: RubricReply) -> ReviewVerdict {
        let format = reply.format.clamp(0.0, 100.0);
        let completeness = reply.completeness.clamp(0.0, 100.0);
        let justification = reply.justification.clamp(0.0, 100.0);
        let c = self.config;
        let score = format * c.format_weight
            + completeness * c.completeness_weight
            + justification * c.justification_weight;
        let status = if score >= c.approval_threshold {
            ReviewStatus::Approved
        } else {
            ReviewStatus::NeedsImprovement
        };
        ReviewVerdict {
            status,
            score,
            format,
            completeness,
            justification,
            issues: reply.issues,
            suggestions: reply.suggestions,
            feedback: reply.feedback,
            reviewed: true,
        }
    }
}

fn render_prompt(input: &ReviewInput<'_>) -> String {
    let mut out = format!("Question:\n{}\n", input.query);

    let history = history_summary(input.history, REVIEW_HISTORY_TURNS, REVIEW_HISTORY_CHARS);
    if !history.is_empty() {
        out.push_str(&format!("\nEarlier conversation:\n{history}"));
    }
    if let Some(user) = input.user_context.filter(|u| !u.is_empty()) {
        out.push_str(&format!("\nUser context:\n{}", user.render()));
    }

    out.push_str(&format!("\nDraft answer:\n{}\n", input.draft.answer));

    let evidence = input.draft.evidence();
    if evidence.is_empty() {
        out.push_str("\nRecords retrieved: none\n");
    } else {
        out.push_str("\nRecords retrieved:\n");
        for e in &evidence {
            out.push_str(&format!("- [{}] {}\n", e.record_id, e.title));
        }
    }

    let usage = input.draft.tool_usage();
    if !usage.is_empty() {
        out.push_str("\nTool usage:\n");
        for u in &usage {
            out.push_str(&format!("- {}: {} call(s), {} failed\n", u.name, u.calls, u.failures));
        }
    }
    if input.draft.truncated {
        out.push_str("\nThe draft was written after the tool budget ran out.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::harness::StopReason;
    use crate::test_support::{ScriptedModel, review_reply};

    fn draft(answer: &str) -> AgentTranscript {
        AgentTranscript {
            trace_id: "tr".into(),
            exchanges: vec![],
            iterations: 1,
            answer: answer.into(),
            stop: StopReason::Finished,
            truncated: false,
        }
    }

    #[tokio::test]
    async fn weighted_score_and_status() {
        let model = ScriptedModel::new().with_reviewer(|_| review_reply(90.0, 80.0, 70.0));
        let config = ReviewConfig::default();
        let d = draft("A is the match.");
        let verdict = ResponseReviewer::new(&model, &config)
            .review(&ReviewInput {
                query: "q",
                history: &[],
                draft: &d,
                user_context: None,
            })
            .await
            .unwrap();
        // 0.3 * 90 + 0.4 * 80 + 0.3 * 70 = 80
        assert!((verdict.score - 80.0).abs() < 1e-9);
        assert_eq!(verdict.status, ReviewStatus::Approved);
        assert!(verdict.reviewed);

        let strict = config.clone().with_approval_threshold(85.0);
        let verdict = ResponseReviewer::new(&model, &strict)
            .review(&ReviewInput {
                query: "q",
                history: &[],
                draft: &d,
                user_context: None,
            })
            .await
            .unwrap();
        assert_eq!(verdict.status, ReviewStatus::NeedsImprovement);
    }

    #[tokio::test]
    async fn failure_yields_placeholder() {
        let model = ScriptedModel::new();
        let config = ReviewConfig::default();
        let d = draft("x");
        let verdict = ResponseReviewer::new(&model, &config)
            .review_or_fallback(&ReviewInput {
                query: "q",
                history: &[],
                draft: &d,
                user_context: None,
            })
            .await;
        assert!(!verdict.reviewed);
        assert_eq!(verdict.status, ReviewStatus::NeedsImprovement);
        assert!(verdict.feedback.starts_with("review unavailable"));
    }

    #[test]
    fn prompt_includes_draft_and_history() {
        let d = draft("The answer is A.");
        let history = vec![ConversationTurn::new("earlier q", "earlier a")];
        let prompt = render_prompt(&ReviewInput {
            query: "which?",
            history: &history,
            draft: &d,
            user_context: None,
        });
        assert!(prompt.contains("Question:\nwhich?"));
        assert!(prompt.contains("User: earlier q"));
        assert!(prompt.contains("Draft answer:\nThe answer is A."));
        assert!(prompt.contains("Records retrieved: none"));
    }
}
