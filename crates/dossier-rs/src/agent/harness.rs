//! Agent loop: a bounded tool-use state machine on top of a
//! [`LanguageModel`].
//!
//! The [`AgentLoop`] sends the conversation plus tool definitions to the
//! model, executes any returned tool calls through a [`ToolExecutor`],
//! appends the results, and repeats until the model produces a text-only
//! answer or the iteration budget runs out. Reaching the cap is not an
//! error: the loop asks for a final answer with tools withheld and marks the
//! transcript truncated.
//!
//! ```text
//! Idle -> Deciding -> Executing -> Observing -> Deciding -> ... -> Finished
//!                                                           \-> Exhausted
//! ```

use super::config::AgentConfig;
use super::events::{AgentEvent, EventHandler, NoopHandler};
use super::execution::{execute_tool_round, force_final_answer, request_decision};
use super::history::{ConversationTurn, history_messages};
use super::prompt::agent_system_prompt;
use crate::Message;
use crate::api::model::LanguageModel;
use crate::api::tracing::{generate_span_id, generate_trace_id};
use crate::error::{AgentError, ProviderError};
use crate::review::Pass;
use crate::tools::core::{EvidenceRef, ToolCatalog, ToolContext};
use crate::tools::executor::{ToolExchange, ToolExecutor};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

// ── Transcript ─────────────────────────────────────────────────────

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Finished,
    /// The iteration cap was reached; the answer was forced.
    Exhausted,
    /// The stop signal fired.
    Cancelled,
}

/// Calls and failures of one tool within a pass or a merged turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    pub name: String,
    pub calls: u32,
    pub failures: u32,
}

/// Everything one agent pass did.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTranscript {
    pub trace_id: String,
    /// Invocation/result pairs in execution order.
    pub exchanges: Vec<ToolExchange>,
    /// Decision iterations used. Never exceeds the configured cap.
    pub iterations: u32,
    pub answer: String,
    pub stop: StopReason,
    /// Set when the answer was forced at the iteration cap.
    pub truncated: bool,
}

impl AgentTranscript {
    /// Per-tool call counts, sorted by tool name.
    pub fn tool_usage(&self) -> Vec<ToolUsage> {
        summarize_usage(self.exchanges.iter())
    }

    /// Records retrieved by successful tool calls, deduplicated by id in
    /// first-seen order.
    pub fn evidence(&self) -> Vec<EvidenceRef> {
        dedup_evidence(self.exchanges.iter())
    }
}

pub(crate) fn summarize_usage<'a>(exchanges: impl Iterator<Item = &'a ToolExchange>) -> Vec<ToolUsage> {
    let mut usage: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for exchange in exchanges {
        let entry = usage.entry(exchange.result.tool_name.as_str()).or_default();
        entry.0 += 1;
        if !exchange.result.success() {
            entry.1 += 1;
        }
    }
    usage
        .into_iter()
        .map(|(name, (calls, failures))| ToolUsage {
            name: name.to_string(),
            calls,
            failures,
        })
        .collect()
}

pub(crate) fn dedup_evidence<'a>(exchanges: impl Iterator<Item = &'a ToolExchange>) -> Vec<EvidenceRef> {
    let mut seen = HashSet::new();
    exchanges
        .flat_map(|x| x.result.evidence().iter())
        .filter(|e| seen.insert(e.record_id.clone()))
        .cloned()
        .collect()
}

// ── AgentLoop ──────────────────────────────────────────────────────

/// The bounded tool-use loop.
///
/// ```ignore
/// let catalog = default_catalog(search, corpus.clone(), corpus, None, &[])?;
/// let transcript = AgentLoop::new(&model, &catalog, AgentConfig::default())
///     .with_event_handler(&LoggingHandler)
///     .run("Which tenders mention bridge inspections?", &history)
///     .await?;
///
/// println!("{}", transcript.answer);
/// ```
///
/// # Lifetimes
///
/// `AgentLoop<'a>` borrows the model, catalog, and event handler. Bind them
/// to `let` bindings before building the loop so they outlive `.run()`.
pub struct AgentLoop<'a> {
    model: &'a dyn LanguageModel,
    catalog: &'a ToolCatalog,
    config: AgentConfig,
    event_handler: &'a dyn EventHandler,
    /// Checked before each iteration. If it returns `true` the loop stops
    /// and returns what it has.
    stop_signal: Option<Box<dyn Fn() -> bool + Send + Sync + 'a>>,
    trace_id: Option<String>,
    pass: Pass,
}

impl<'a> AgentLoop<'a> {
    pub fn new(model: &'a dyn LanguageModel, catalog: &'a ToolCatalog, config: AgentConfig) -> Self {
        Self {
            model,
            catalog,
            config,
            event_handler: &NoopHandler,
            stop_signal: None,
            trace_id: None,
            pass: Pass::Initial,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.stop_signal = Some(Box::new(signal));
        self
    }

    /// Use a caller-chosen trace id instead of a generated one.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Which pass of a turn this loop runs; only affects events.
    pub fn with_pass(mut self, pass: Pass) -> Self {
        self.pass = pass;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.stop_signal.as_ref().is_some_and(|stop| stop())
    }

    /// Run the loop for one query.
    ///
    /// The model sees the system prompt, the last `history_window` turns of
    /// `history`, and `query`. Provider failures end the pass with an
    /// [`AgentError`] carrying the partial transcript; tool failures never
    /// do.
    pub async fn run(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<AgentTranscript, AgentError> {
        let trace_id = self.trace_id.clone().unwrap_or_else(generate_trace_id);
        let max_iterations = self.config.max_iterations;
        info!(
            "[{trace_id}] Agent pass started ({} tool(s), cap {max_iterations})",
            self.catalog.active_names().len()
        );
        self.event_handler.on_event(&AgentEvent::PassStarted {
            pass: self.pass,
            trace_id: &trace_id,
            query,
        });

        let available = self.catalog.active_names();
        let definitions = self.catalog.definitions();
        let tools = (!definitions.is_empty()).then_some(definitions.as_slice());

        let mut messages = Vec::with_capacity(2 * self.config.history_window + 2);
        messages.push(Message::system(agent_system_prompt(
            self.config.system_prompt.as_deref(),
            self.catalog,
        )));
        messages.extend(history_messages(history, self.config.history_window));
        messages.push(Message::user(query));

        let ctx = ToolContext::new(self.event_handler, self.stop_signal.as_deref());
        let mut executor = ToolExecutor::new(self.catalog, self.config.tool_timeout())
            .with_max_result_bytes(self.config.max_result_bytes)
            .with_parallel(self.config.parallel_tools)
            .with_context(ctx);

        let mut iterations: u32 = 0;
        let mut sequence: u32 = 0;
        let mut empty_responses: u32 = 0;
        let mut last_text = String::new();

        let partial = |executor: &ToolExecutor<'_>, iterations: u32, answer: &str, stop| AgentTranscript {
            trace_id: trace_id.clone(),
            exchanges: executor.transcript().to_vec(),
            iterations,
            answer: answer.to_string(),
            stop,
            truncated: false,
        };

        while iterations < max_iterations {
            if self.is_cancelled() {
                info!("[{trace_id}] Stop signal received before iteration {}", iterations + 1);
                self.event_handler.on_event(&AgentEvent::Cancelled {
                    iteration: iterations + 1,
                });
                return Ok(partial(&executor, iterations, &last_text, StopReason::Cancelled));
            }

            iterations += 1;
            debug!("[{}] deciding", generate_span_id(&trace_id, iterations));
            self.event_handler.on_event(&AgentEvent::IterationStart {
                iteration: iterations,
                max_iterations,
            });

            // ── Deciding ──
            let completion = match request_decision(self.model, &self.config, &messages, tools).await {
                Ok(c) => c,
                Err(e) => {
                    return Err(AgentError::new(
                        e,
                        partial(&executor, iterations, &last_text, StopReason::Finished),
                    ));
                }
            };

            if let Some(text) = completion.content.as_deref().filter(|t| !t.trim().is_empty()) {
                self.event_handler.on_event(&AgentEvent::Text(text));
                last_text = text.to_string();
            }

            if completion.tool_calls.is_empty() {
                if completion.has_text() {
                    // ── Finished ──
                    self.event_handler.on_event(&AgentEvent::Finished {
                        iterations,
                        truncated: false,
                    });
                    info!("[{trace_id}] Agent pass finished after {iterations} iteration(s)");
                    return Ok(partial(&executor, iterations, &last_text, StopReason::Finished));
                }

                empty_responses += 1;
                self.event_handler.on_event(&AgentEvent::EmptyResponse {
                    iteration: iterations,
                    attempt: empty_responses,
                    max_retries: self.config.empty_response_retries,
                });
                if empty_responses > self.config.empty_response_retries {
                    return Err(AgentError::new(
                        ProviderError::Malformed(format!(
                            "model returned neither text nor tool calls {empty_responses} time(s)"
                        )),
                        partial(&executor, iterations, &last_text, StopReason::Finished),
                    ));
                }
                continue;
            }

            // ── Executing / Observing ──
            self.event_handler.on_event(&AgentEvent::ToolCallsReceived {
                iteration: iterations,
                count: completion.tool_calls.len(),
            });
            execute_tool_round(
                &mut executor,
                &mut messages,
                &completion,
                iterations,
                &mut sequence,
                &available,
            )
            .await;
        }

        // ── Exhausted ──
        info!("[{trace_id}] Iteration cap reached ({max_iterations}); forcing final answer");
        self.event_handler
            .on_event(&AgentEvent::BudgetExhausted { max_iterations });

        let answer = match force_final_answer(self.model, &self.config, &mut messages).await {
            Ok(answer) => answer,
            Err(e) => {
                let mut transcript = partial(&executor, iterations, &last_text, StopReason::Exhausted);
                transcript.truncated = true;
                return Err(AgentError::new(e, transcript));
            }
        };
        self.event_handler.on_event(&AgentEvent::Text(&answer));
        self.event_handler.on_event(&AgentEvent::Finished {
            iterations,
            truncated: true,
        });

        let mut transcript = partial(&executor, iterations, &answer, StopReason::Exhausted);
        transcript.truncated = true;
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::{EventLog, TurnEvent};
    use crate::error::ToolErrorKind;
    use crate::test_support::ScriptedModel;
    use crate::tools::core::{FnTool, ToolOutput};
    use crate::tools::spec::ToolSpec;
    use crate::{ChatCompletion, ToolCall};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn catalog() -> ToolCatalog {
        ToolCatalog::new()
            .with(FnTool::new(
                ToolSpec::builder("lookup", "Look up").build(),
                |_: serde_json::Value| async move {
                    Ok(ToolOutput::text("found A").with_evidence([EvidenceRef::new("A", "Alpha")]))
                },
            ))
            .unwrap()
    }

    fn call(id: &str, name: &str) -> ChatCompletion {
        ChatCompletion::tool_calls(vec![ToolCall::new(id, name, "{}")])
    }

    #[tokio::test]
    async fn finishes_on_text_answer() {
        let catalog = catalog();
        let model = ScriptedModel::new().with_agent_replies([
            call("c1", "lookup"),
            ChatCompletion::text("Record A answers it."),
        ]);
        let transcript = AgentLoop::new(&model, &catalog, AgentConfig::default())
            .run("q", &[])
            .await
            .unwrap();
        assert_eq!(transcript.stop, StopReason::Finished);
        assert_eq!(transcript.iterations, 2);
        assert_eq!(transcript.answer, "Record A answers it.");
        assert!(!transcript.truncated);
        assert_eq!(transcript.evidence(), vec![EvidenceRef::new("A", "Alpha")]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_loop_continues() {
        let catalog = catalog();
        let model = ScriptedModel::new().with_agent_replies([
            call("c1", "does_not_exist"),
            ChatCompletion::text("Sorry, no such tool."),
        ]);
        let transcript = AgentLoop::new(&model, &catalog, AgentConfig::default())
            .run("q", &[])
            .await
            .unwrap();
        assert_eq!(transcript.stop, StopReason::Finished);
        assert_eq!(
            transcript.exchanges[0].result.error_kind(),
            Some(ToolErrorKind::NotFound)
        );
        let usage = transcript.tool_usage();
        assert_eq!(usage[0].name, "does_not_exist");
        assert_eq!((usage[0].calls, usage[0].failures), (1, 1));
    }

    #[tokio::test]
    async fn cap_forces_truncated_answer() {
        let catalog = catalog();
        let model = ScriptedModel::new()
            .with_agent_fn(|req| {
                if req.tools.is_some() {
                    call("c", "lookup")
                } else {
                    ChatCompletion::text("Partial: A looks relevant.")
                }
            });
        let config = AgentConfig::default().with_max_iterations(3);
        let transcript = AgentLoop::new(&model, &catalog, config).run("q", &[]).await.unwrap();
        assert_eq!(transcript.stop, StopReason::Exhausted);
        assert!(transcript.truncated);
        assert_eq!(transcript.iterations, 3);
        assert_eq!(transcript.exchanges.len(), 3);
        assert_eq!(transcript.answer, "Partial: A looks relevant.");
    }

    #[tokio::test]
    async fn empty_responses_retry_then_fail() {
        let catalog = catalog();
        let model = ScriptedModel::new().with_agent_fn(|_| ChatCompletion::default());
        let mut config = AgentConfig::default();
        config.empty_response_retries = 1;
        let err = AgentLoop::new(&model, &catalog, config).run("q", &[]).await.unwrap_err();
        assert!(matches!(err.source, ProviderError::Malformed(_)));
        assert_eq!(err.partial.iterations, 2);
    }

    #[tokio::test]
    async fn empty_response_recovers() {
        let catalog = catalog();
        let model = ScriptedModel::new()
            .with_agent_replies([ChatCompletion::default(), ChatCompletion::text("ok")]);
        let transcript = AgentLoop::new(&model, &catalog, AgentConfig::default())
            .run("q", &[])
            .await
            .unwrap();
        assert_eq!(transcript.answer, "ok");
        assert_eq!(transcript.iterations, 2);
    }

    #[tokio::test]
    async fn provider_error_carries_partial_transcript() {
        let catalog = catalog();
        let model = ScriptedModel::new()
            .with_agent_replies([call("c1", "lookup")])
            .with_agent_error(ProviderError::Api("overloaded".into()));
        let err = AgentLoop::new(&model, &catalog, AgentConfig::default())
            .run("q", &[])
            .await
            .unwrap_err();
        assert_eq!(err.partial.exchanges.len(), 1);
        assert_eq!(err.partial.iterations, 2);
    }

    #[tokio::test]
    async fn stop_signal_cancels_between_iterations() {
        let catalog = catalog();
        let model = ScriptedModel::new().with_agent_fn(|_| call("c", "lookup"));
        let checks = AtomicU32::new(0);
        let transcript = AgentLoop::new(&model, &catalog, AgentConfig::default())
            .with_stop_signal(|| checks.fetch_add(1, Ordering::SeqCst) >= 2)
            .run("q", &[])
            .await
            .unwrap();
        assert_eq!(transcript.stop, StopReason::Cancelled);
        assert_eq!(transcript.iterations, 2);
        assert_eq!(transcript.exchanges.len(), 2);
    }

    #[tokio::test]
    async fn history_is_windowed() {
        let catalog = catalog();
        let model = ScriptedModel::new().with_agent_replies([ChatCompletion::text("a")]);
        let history: Vec<_> = (0..5)
            .map(|i| ConversationTurn::new(format!("q{i}"), format!("a{i}")))
            .collect();
        AgentLoop::new(&model, &catalog, AgentConfig::default().with_history_window(2))
            .run("now", &history)
            .await
            .unwrap();
        let request = &model.requests()[0];
        // system + 2 turns * 2 + user
        assert_eq!(request.messages.len(), 6);
        assert_eq!(request.messages[1].content.as_deref(), Some("q3"));
        assert_eq!(request.last_user_message(), Some("now"));
    }

    #[tokio::test]
    async fn emits_pass_and_tool_events() {
        let catalog = catalog();
        let model = ScriptedModel::new()
            .with_agent_replies([call("c1", "lookup"), ChatCompletion::text("done")]);
        let log = EventLog::new();
        AgentLoop::new(&model, &catalog, AgentConfig::default())
            .with_event_handler(&log)
            .with_trace_id("tr-test")
            .run("q", &[])
            .await
            .unwrap();
        let events: Vec<TurnEvent> = log.snapshot().into_iter().map(|e| e.event).collect();
        assert!(matches!(&events[0], TurnEvent::PassStarted { trace_id, .. } if trace_id == "tr-test"));
        assert!(events.iter().any(|e| matches!(e, TurnEvent::ToolCompleted { .. })));
        assert!(matches!(
            events.last(),
            Some(TurnEvent::Finished {
                iterations: 2,
                truncated: false
            })
        ));
    }
}
