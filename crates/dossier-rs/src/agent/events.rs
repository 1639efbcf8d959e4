//! Events and handlers: the per-turn observation stream.
//!
//! The agent loop, the iterative search controller and the turn runner
//! report what they do through [`AgentEvent`] values delivered to an
//! [`EventHandler`]. The core never installs a log sink itself; callers pick
//! a handler.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`EventLog`] | Owned, serializable copy of the stream for external loggers |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::review::{Pass, ReviewVerdict};
use crate::search::{SearchOutcome, SearchRoundRecord};
use crate::tools::executor::{ToolInvocation, ToolResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during a user turn.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// An agent pass is starting.
    PassStarted {
        pass: Pass,
        trace_id: &'a str,
        query: &'a str,
    },
    /// A decision iteration is starting.
    IterationStart { iteration: u32, max_iterations: u32 },
    /// The model returned text (may be alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls this iteration.
    ToolCallsReceived { iteration: u32, count: usize },
    /// A tool invocation is about to run.
    ToolInvoked(&'a ToolInvocation),
    /// A tool invocation finished, successfully or not.
    ToolCompleted(&'a ToolResult),
    /// The model returned neither text nor tool calls.
    EmptyResponse {
        iteration: u32,
        attempt: u32,
        max_retries: u32,
    },
    /// The iteration cap was reached; a forced final answer follows.
    BudgetExhausted { max_iterations: u32 },
    /// The pass produced its final answer.
    Finished { iterations: u32, truncated: bool },
    /// The stop signal fired; the pass returns what it has.
    Cancelled { iteration: u32 },
    /// One refine, search, verify round completed.
    SearchRound(&'a SearchRoundRecord),
    /// An iterative search resolved.
    SearchResolved(&'a SearchOutcome),
    /// The reviewer scored the draft.
    ReviewCompleted(&'a ReviewVerdict),
    /// Both passes were merged into the turn's outcome.
    TurnMerged {
        total_iterations: u32,
        evidence_count: usize,
    },
}

/// Handler for agent events.
///
/// # Example
///
/// ```ignore
/// struct PrintTools;
///
/// impl EventHandler for PrintTools {
///     fn on_event(&self, event: &AgentEvent<'_>) {
///         if let AgentEvent::ToolCompleted(result) = event {
///             println!("{} -> success={}", result.tool_name, result.success());
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let _ = event;
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn on_event(&self, event: &AgentEvent<'_>) {
        (**self).on_event(event);
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &H {
    fn on_event(&self, event: &AgentEvent<'_>) {
        (**self).on_event(event);
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches every event to several handlers, in registration order.
///
/// ```ignore
/// let log = Arc::new(EventLog::new());
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(log.clone());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::PassStarted {
                pass,
                trace_id,
                query,
            } => {
                let preview: String = query.chars().take(120).collect();
                info!("[{trace_id}] {pass} pass: {preview}");
            }
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
            } => {
                debug!("[iteration {iteration}/{max_iterations}]");
            }
            AgentEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.len() > preview.len() { "..." } else { "" }
                );
            }
            AgentEvent::ToolCallsReceived { iteration, count } => {
                debug!("{count} tool call(s) in iteration {iteration}");
            }
            AgentEvent::ToolInvoked(inv) => {
                debug!("Invoking #{} {}", inv.sequence, inv.tool_name);
            }
            AgentEvent::ToolCompleted(result) => match result.error_kind() {
                None => debug!("Tool #{} {} ok", result.sequence, result.tool_name),
                Some(kind) => info!("Tool #{} {} failed ({kind})", result.sequence, result.tool_name),
            },
            AgentEvent::EmptyResponse {
                iteration,
                attempt,
                max_retries,
            } => {
                warn!(
                    "Empty model response at iteration {iteration} (no content, no tool calls). \
                     Retrying ({attempt}/{max_retries})..."
                );
            }
            AgentEvent::BudgetExhausted { max_iterations } => {
                info!("Agent hit iteration cap ({max_iterations}); forcing a final answer");
            }
            AgentEvent::Finished {
                iterations,
                truncated,
            } => {
                info!("Agent finished after {iterations} iteration(s) (truncated={truncated})");
            }
            AgentEvent::Cancelled { iteration } => {
                info!("Agent cancelled before iteration {iteration}");
            }
            AgentEvent::SearchRound(record) => {
                let best = record.best_check();
                debug!(
                    "Search round {}: query={:?} best={} score={} -> {}",
                    record.round,
                    record.query,
                    best.map_or("-", |c| c.record_id.as_str()),
                    best.map_or(0, |c| c.score),
                    record.feedback.render(),
                );
            }
            AgentEvent::SearchResolved(outcome) => {
                info!(
                    "Search resolved: selected={:?} confidence={:.2} reliable={} rounds={}",
                    outcome.selected, outcome.confidence, outcome.reliable, outcome.rounds_completed
                );
            }
            AgentEvent::ReviewCompleted(verdict) => {
                info!(
                    "Review: {} (score {:.0}, {} issue(s))",
                    verdict.status,
                    verdict.score,
                    verdict.issues.len()
                );
            }
            AgentEvent::TurnMerged {
                total_iterations,
                evidence_count,
            } => {
                info!("Turn merged: {total_iterations} iteration(s), {evidence_count} record(s) of evidence");
            }
        }
    }
}

// ── Owned event stream ─────────────────────────────────────────────

/// Owned, serializable copy of an [`AgentEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    PassStarted {
        pass: Pass,
        trace_id: String,
        query: String,
    },
    IterationStart {
        iteration: u32,
        max_iterations: u32,
    },
    Text {
        text: String,
    },
    ToolCallsReceived {
        iteration: u32,
        count: usize,
    },
    ToolInvoked {
        invocation: ToolInvocation,
    },
    ToolCompleted {
        result: ToolResult,
    },
    EmptyResponse {
        iteration: u32,
        attempt: u32,
        max_retries: u32,
    },
    BudgetExhausted {
        max_iterations: u32,
    },
    Finished {
        iterations: u32,
        truncated: bool,
    },
    Cancelled {
        iteration: u32,
    },
    SearchRound {
        record: SearchRoundRecord,
    },
    SearchResolved {
        outcome: SearchOutcome,
    },
    ReviewCompleted {
        verdict: ReviewVerdict,
    },
    TurnMerged {
        total_iterations: u32,
        evidence_count: usize,
    },
}

impl From<&AgentEvent<'_>> for TurnEvent {
    fn from(event: &AgentEvent<'_>) -> Self {
        match event {
            AgentEvent::PassStarted {
                pass,
                trace_id,
                query,
            } => TurnEvent::PassStarted {
                pass: *pass,
                trace_id: trace_id.to_string(),
                query: query.to_string(),
            },
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
            } => TurnEvent::IterationStart {
                iteration: *iteration,
                max_iterations: *max_iterations,
            },
            AgentEvent::Text(text) => TurnEvent::Text {
                text: text.to_string(),
            },
            AgentEvent::ToolCallsReceived { iteration, count } => TurnEvent::ToolCallsReceived {
                iteration: *iteration,
                count: *count,
            },
            AgentEvent::ToolInvoked(inv) => TurnEvent::ToolInvoked {
                invocation: (*inv).clone(),
            },
            AgentEvent::ToolCompleted(result) => TurnEvent::ToolCompleted {
                result: (*result).clone(),
            },
            AgentEvent::EmptyResponse {
                iteration,
                attempt,
                max_retries,
            } => TurnEvent::EmptyResponse {
                iteration: *iteration,
                attempt: *attempt,
                max_retries: *max_retries,
            },
            AgentEvent::BudgetExhausted { max_iterations } => TurnEvent::BudgetExhausted {
                max_iterations: *max_iterations,
            },
            AgentEvent::Finished {
                iterations,
                truncated,
            } => TurnEvent::Finished {
                iterations: *iterations,
                truncated: *truncated,
            },
            AgentEvent::Cancelled { iteration } => TurnEvent::Cancelled {
                iteration: *iteration,
            },
            AgentEvent::SearchRound(record) => TurnEvent::SearchRound {
                record: (*record).clone(),
            },
            AgentEvent::SearchResolved(outcome) => TurnEvent::SearchResolved {
                outcome: (*outcome).clone(),
            },
            AgentEvent::ReviewCompleted(verdict) => TurnEvent::ReviewCompleted {
                verdict: (*verdict).clone(),
            },
            AgentEvent::TurnMerged {
                total_iterations,
                evidence_count,
            } => TurnEvent::TurnMerged {
                total_iterations: *total_iterations,
                evidence_count: *evidence_count,
            },
        }
    }
}

/// A [`TurnEvent`] with the time it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TurnEvent,
}

/// Records every event it sees. Read-only from the outside: callers take a
/// [`snapshot`](Self::snapshot) or serialize the stream as JSON lines.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> String {
        self.snapshot()
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl EventHandler for EventLog {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let recorded = RecordedEvent {
            at: Utc::now(),
            event: TurnEvent::from(event),
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(recorded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_to_all() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            }))
            .with_if(false, NoopHandler)
            .with_opt(Some(FnEventHandler::new(move |_| {
                c2.fetch_add(10, Ordering::SeqCst);
            })));
        handler.on_event(&AgentEvent::Text("hi"));
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn event_log_records_owned_copies() {
        let log = EventLog::new();
        log.on_event(&AgentEvent::IterationStart {
            iteration: 1,
            max_iterations: 15,
        });
        log.on_event(&AgentEvent::Finished {
            iterations: 1,
            truncated: false,
        });
        assert_eq!(log.len(), 2);
        assert!(matches!(
            log.snapshot()[1].event,
            TurnEvent::Finished { iterations: 1, .. }
        ));
    }

    #[test]
    fn event_log_serializes_json_lines() {
        let log = EventLog::new();
        log.on_event(&AgentEvent::Text("answer"));
        log.on_event(&AgentEvent::BudgetExhausted { max_iterations: 3 });
        let lines = log.to_json_lines();
        let parsed: Vec<serde_json::Value> = lines
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["event"], "text");
        assert_eq!(parsed[0]["text"], "answer");
        assert_eq!(parsed[1]["event"], "budget_exhausted");
        assert!(parsed[1]["at"].is_string());
    }

    #[test]
    fn shared_log_through_arc() {
        let log = Arc::new(EventLog::new());
        let handler: &dyn EventHandler = &log;
        handler.on_event(&AgentEvent::Cancelled { iteration: 2 });
        assert_eq!(log.len(), 1);
    }
}
