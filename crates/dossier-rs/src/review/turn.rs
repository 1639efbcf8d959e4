//! One user turn: draft pass, review, improvement pass, merge.
//!
//! The improvement pass always runs, whatever the verdict. Both passes are
//! plain [`AgentLoop`] runs; only the query and history differ.

use super::reviewer::{ResponseReviewer, ReviewInput, ReviewVerdict};
use super::Pass;
use crate::agent::config::AgentConfig;
use crate::agent::events::{AgentEvent, EventHandler, NoopHandler};
use crate::agent::harness::{
    AgentLoop, AgentTranscript, StopReason, ToolUsage, dedup_evidence, summarize_usage,
};
use crate::agent::history::ConversationTurn;
use crate::api::model::LanguageModel;
use crate::api::tracing::{generate_trace_id, pass_trace_id};
use crate::config::ReviewConfig;
use crate::corpus::UserContextProvider;
use crate::error::TurnError;
use crate::tools::core::{EvidenceRef, ToolCatalog};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// The result of a turn: the improvement pass's answer plus the union of
/// what both passes did.
#[derive(Debug, Clone, Serialize)]
pub struct MergedOutcome {
    pub trace_id: String,
    /// Always the improvement pass's answer. Empty when the turn was
    /// cancelled before that pass answered; see [`MergedOutcome::partial_answer`].
    pub answer: String,
    /// Records retrieved by either pass, deduplicated by id.
    pub evidence: Vec<EvidenceRef>,
    /// Per-tool counts summed over both passes.
    pub tool_usage: Vec<ToolUsage>,
    pub total_iterations: u32,
    pub verdict: ReviewVerdict,
    /// The improvement pass hit its iteration cap.
    pub truncated: bool,
    /// The stop signal ended a pass early.
    pub cancelled: bool,
    pub initial: AgentTranscript,
    pub improvement: AgentTranscript,
}

impl MergedOutcome {
    pub fn merge(
        trace_id: impl Into<String>,
        initial: AgentTranscript,
        improvement: AgentTranscript,
        verdict: ReviewVerdict,
    ) -> Self {
        let both = || initial.exchanges.iter().chain(&improvement.exchanges);
        Self {
            trace_id: trace_id.into(),
            answer: improvement.answer.clone(),
            evidence: dedup_evidence(both()),
            tool_usage: summarize_usage(both()),
            total_iterations: initial.iterations + improvement.iterations,
            verdict,
            truncated: improvement.truncated,
            cancelled: initial.stop == StopReason::Cancelled
                || improvement.stop == StopReason::Cancelled,
            initial,
            improvement,
        }
    }

    /// The answer to show: the improvement pass's, or the draft when a
    /// cancelled improvement pass produced no text.
    pub fn partial_answer(&self) -> &str {
        if self.cancelled && self.answer.trim().is_empty() {
            &self.initial.answer
        } else {
            &self.answer
        }
    }
}

/// Runs complete turns against a shared model and catalog.
///
/// ```ignore
/// let outcome = TurnRunner::new(&model, &catalog, config.agent, config.review)
///     .with_event_handler(&LoggingHandler)
///     .run_agent_turn("Which tenders cover bridge inspections?", &history)
///     .await?;
/// println!("{} (review score {:.0})", outcome.answer, outcome.verdict.score);
/// ```
pub struct TurnRunner<'a> {
    model: &'a dyn LanguageModel,
    catalog: &'a ToolCatalog,
    agent: AgentConfig,
    review: ReviewConfig,
    event_handler: &'a dyn EventHandler,
    stop_signal: Option<Arc<dyn Fn() -> bool + Send + Sync + 'a>>,
    user_context: Option<&'a dyn UserContextProvider>,
}

impl<'a> TurnRunner<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        catalog: &'a ToolCatalog,
        agent: AgentConfig,
        review: ReviewConfig,
    ) -> Self {
        Self {
            model,
            catalog,
            agent,
            review,
            event_handler: &NoopHandler,
            stop_signal: None,
            user_context: None,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Checked before every agent iteration and search round of both passes.
    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.stop_signal = Some(Arc::new(signal));
        self
    }

    /// User profile shown to the reviewer.
    pub fn with_user_context(mut self, provider: &'a dyn UserContextProvider) -> Self {
        self.user_context = Some(provider);
        self
    }

    fn agent_loop(&self, pass: Pass, turn_id: &str) -> AgentLoop<'_> {
        let mut agent = AgentLoop::new(self.model, self.catalog, self.agent.clone())
            .with_event_handler(self.event_handler)
            .with_trace_id(pass_trace_id(turn_id, pass.as_str()))
            .with_pass(pass);
        if let Some(stop) = self.stop_signal.clone() {
            agent = agent.with_stop_signal(move || stop());
        }
        agent
    }

    fn is_cancelled(&self) -> bool {
        self.stop_signal.as_ref().is_some_and(|stop| stop())
    }

    /// Answer `query` given the prior conversation.
    ///
    /// Runs exactly two agent passes. A provider failure in the draft pass
    /// returns [`TurnError::InitialPass`]; one in the improvement pass
    /// returns [`TurnError::ImprovementPass`] with the draft and verdict.
    pub async fn run_agent_turn(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<MergedOutcome, TurnError> {
        let turn_id = generate_trace_id();
        info!("[{turn_id}] Turn started");

        let initial = self
            .agent_loop(Pass::Initial, &turn_id)
            .run(query, history)
            .await
            .map_err(TurnError::InitialPass)?;

        let verdict = if self.is_cancelled() {
            ReviewVerdict::unavailable("turn cancelled")
        } else {
            let user_context = match self.user_context {
                Some(provider) => provider.user_context().await,
                None => None,
            };
            ResponseReviewer::new(self.model, &self.review)
                .review_or_fallback(&ReviewInput {
                    query,
                    history,
                    draft: &initial,
                    user_context: user_context.as_ref(),
                })
                .await
        };
        info!(
            "[{turn_id}] Draft reviewed: {} ({:.0}/100)",
            verdict.status, verdict.score
        );
        self.event_handler
            .on_event(&AgentEvent::ReviewCompleted(&verdict));

        let prompt = improvement_prompt(query, &initial.answer, &verdict);
        let mut extended = history.to_vec();
        extended.push(ConversationTurn::new(query, initial.answer.clone()));

        let improvement = match self
            .agent_loop(Pass::Improvement, &turn_id)
            .run(&prompt, &extended)
            .await
        {
            Ok(t) => t,
            Err(source) => {
                return Err(TurnError::ImprovementPass {
                    source,
                    draft: Box::new(initial),
                    verdict,
                });
            }
        };

        let merged = MergedOutcome::merge(turn_id, initial, improvement, verdict);
        self.event_handler.on_event(&AgentEvent::TurnMerged {
            total_iterations: merged.total_iterations,
            evidence_count: merged.evidence.len(),
        });
        info!(
            "[{}] Turn finished: {} iteration(s), {} record(s)",
            merged.trace_id,
            merged.total_iterations,
            merged.evidence.len()
        );
        Ok(merged)
    }
}

/// The improvement pass's user message.
pub fn improvement_prompt(query: &str, draft: &str, verdict: &ReviewVerdict) -> String {
    let bullets = |items: &[String]| {
        if items.is_empty() {
            "- none".to_string()
        } else {
            items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
        }
    };
    format!(
        "Improve your previous answer to this question.\n\n\
         Question:\n{query}\n\n\
         Previous answer:\n{draft}\n\n\
         Review: {status} ({score:.0}/100)\n\
         Issues:\n{issues}\n\
         Suggestions:\n{suggestions}\n\
         Feedback:\n{feedback}\n\n\
         Write the complete improved answer. You may call tools again to fill gaps or \
         verify claims, but you are not required to. Keep everything from the previous \
         answer that was correct.",
        status = verdict.status,
        score = verdict.score,
        issues = bullets(&verdict.issues),
        suggestions = bullets(&verdict.suggestions),
        feedback = if verdict.feedback.is_empty() { "-" } else { verdict.feedback.as_str() },
    )
}
