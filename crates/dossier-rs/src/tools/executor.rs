//! Tool invocation, execution, and the per-pass audit transcript.
//!
//! The [`ToolExecutor`] never lets a failure escape: an unknown tool, bad
//! arguments, a failing callable and a timeout all come back as a
//! [`ToolResult`] with a [`ToolErrorKind`] so the agent can see them and
//! adapt. Every execution is appended to a read-only transcript and reported
//! as [`AgentEvent::ToolInvoked`] / [`AgentEvent::ToolCompleted`].

use super::core::{
    EvidenceRef, ToolCatalog, ToolContext, ToolOutput, log_tool_call, truncate_result,
};
use super::reflection::format_tool_failure;
use crate::ToolCall;
use crate::agent::events::AgentEvent;
use crate::error::{ToolError, ToolErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// One tool call requested by the model. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id, echoed on the tool message.
    pub call_id: String,
    pub tool_name: String,
    /// Raw JSON arguments as the model emitted them.
    pub arguments: String,
    /// 1-based agent iteration that requested the call.
    pub iteration: u32,
    /// 1-based position across the whole pass.
    pub sequence: u32,
}

impl ToolInvocation {
    pub fn from_call(call: &ToolCall, iteration: u32, sequence: u32) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
            iteration,
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(ToolOutput),
    Failure { kind: ToolErrorKind, message: String },
}

/// The result of exactly one [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub sequence: u32,
    pub iteration: u32,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl ToolResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        match &self.outcome {
            ToolOutcome::Success(out) => Some(out),
            ToolOutcome::Failure { .. } => None,
        }
    }

    pub fn evidence(&self) -> &[EvidenceRef] {
        self.output().map_or(&[], |o| o.evidence.as_slice())
    }
}

/// An invocation paired with its result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExchange {
    pub invocation: ToolInvocation,
    pub result: ToolResult,
}

impl ToolExchange {
    /// The tool message content the model reads for this exchange.
    pub fn to_model_content(&self, available_tools: &[String]) -> String {
        match &self.result.outcome {
            ToolOutcome::Success(out) => out.text.clone(),
            ToolOutcome::Failure { kind, message } => format_tool_failure(
                &self.invocation.tool_name,
                &self.invocation.arguments,
                *kind,
                message,
                available_tools,
            ),
        }
    }
}

/// Runs invocations against a [`ToolCatalog`]. Scoped to one agent pass.
pub struct ToolExecutor<'a> {
    catalog: &'a ToolCatalog,
    timeout: Duration,
    max_result_bytes: usize,
    parallel: bool,
    ctx: ToolContext<'a>,
    log: Vec<ToolExchange>,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(catalog: &'a ToolCatalog, timeout: Duration) -> Self {
        Self {
            catalog,
            timeout,
            max_result_bytes: super::core::DEFAULT_MAX_RESULT_BYTES,
            parallel: true,
            ctx: ToolContext::detached(),
            log: Vec::new(),
        }
    }

    /// Events and stop signal forwarded to every tool.
    pub fn with_context(mut self, ctx: ToolContext<'a>) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Dispatch independent invocations of one iteration concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Execute one invocation and record it.
    pub async fn execute(&mut self, invocation: ToolInvocation) -> ToolResult {
        self.ctx.events.on_event(&AgentEvent::ToolInvoked(&invocation));
        let result = self.run(&invocation).await;
        self.ctx.events.on_event(&AgentEvent::ToolCompleted(&result));
        self.log.push(ToolExchange {
            invocation,
            result: result.clone(),
        });
        result
    }

    /// Execute a batch. Results come back in invocation order, one each.
    pub async fn execute_all(&mut self, invocations: Vec<ToolInvocation>) -> Vec<ToolResult> {
        let results = if self.parallel && invocations.len() > 1 {
            for inv in &invocations {
                self.ctx.events.on_event(&AgentEvent::ToolInvoked(inv));
            }
            let this = &*self;
            futures::future::join_all(invocations.iter().map(|inv| this.run(inv))).await
        } else {
            let mut results = Vec::with_capacity(invocations.len());
            for inv in &invocations {
                self.ctx.events.on_event(&AgentEvent::ToolInvoked(inv));
                results.push(self.run(inv).await);
            }
            results
        };

        for (invocation, result) in invocations.into_iter().zip(&results) {
            self.ctx.events.on_event(&AgentEvent::ToolCompleted(result));
            self.log.push(ToolExchange {
                invocation,
                result: result.clone(),
            });
        }
        results
    }

    /// Every exchange executed so far, in execution order.
    pub fn transcript(&self) -> &[ToolExchange] {
        &self.log
    }

    pub fn into_transcript(self) -> Vec<ToolExchange> {
        self.log
    }

    async fn run(&self, invocation: &ToolInvocation) -> ToolResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = self.dispatch(invocation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            ToolOutcome::Success(out) => debug!(
                "Tool {} completed in {duration_ms}ms ({} bytes, {} evidence)",
                invocation.tool_name,
                out.text.len(),
                out.evidence.len()
            ),
            ToolOutcome::Failure { kind, message } => info!(
                "Tool {} failed ({kind}) in {duration_ms}ms: {message}",
                invocation.tool_name
            ),
        }

        ToolResult {
            call_id: invocation.call_id.clone(),
            tool_name: invocation.tool_name.clone(),
            sequence: invocation.sequence,
            iteration: invocation.iteration,
            outcome,
            duration_ms,
            started_at,
        }
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let name = invocation.tool_name.as_str();
        let tool = match self.catalog.resolve(name) {
            Ok(t) => t,
            Err(e) => return failure(ToolErrorKind::NotFound, e.to_string()),
        };

        let spec = self.catalog.spec(name);
        let args = match spec {
            Some(spec) => validate_arguments(name, &spec.parameters, &invocation.arguments),
            None => parse_arguments(name, &invocation.arguments),
        };
        let limit = spec.and_then(|s| s.timeout).unwrap_or(self.timeout);
        let args = match args {
            Ok(v) => v,
            Err(msg) => return failure(ToolErrorKind::SchemaValidation, msg),
        };

        log_tool_call(name, &invocation.arguments);

        match tokio::time::timeout(limit, tool.execute(args, self.ctx)).await {
            Ok(Ok(mut output)) => {
                trace!("Tool {name} output: {}", output.text.chars().take(300).collect::<String>());
                output.text = truncate_result(output.text, self.max_result_bytes);
                ToolOutcome::Success(output)
            }
            Ok(Err(ToolError::InvalidArguments(msg))) => {
                failure(ToolErrorKind::SchemaValidation, format!("invalid arguments: {msg}"))
            }
            Ok(Err(ToolError::Failed(msg))) => failure(ToolErrorKind::Execution, msg),
            Err(_) => failure(
                ToolErrorKind::Timeout,
                format!(
                    "tool '{name}' timed out after {:.0} seconds",
                    limit.as_secs_f64()
                ),
            ),
        }
    }
}

fn failure(kind: ToolErrorKind, message: String) -> ToolOutcome {
    ToolOutcome::Failure { kind, message }
}

/// Parse raw arguments; an empty string counts as `{}`.
fn parse_arguments(tool_name: &str, arguments: &str) -> Result<serde_json::Value, String> {
    let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(raw)
        .map_err(|e| format!("invalid JSON arguments for tool '{tool_name}': {e}"))
}

/// Parse raw arguments and validate them against the tool's JSON Schema.
pub fn validate_arguments(
    tool_name: &str,
    schema: &serde_json::Value,
    arguments: &str,
) -> Result<serde_json::Value, String> {
    let value = parse_arguments(tool_name, arguments)?;

    // An invalid schema is a registration bug; skip validation rather than
    // failing every call.
    let Ok(validator) = jsonschema::validator_for(schema) else {
        return Ok(value);
    };

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(value)
    } else {
        Err(format!(
            "argument validation failed for tool '{tool_name}':\n{}",
            errors.join("\n")
        ))
    }
}
