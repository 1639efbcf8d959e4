//! Error taxonomy for the orchestration core.
//!
//! Infrastructure failures ([`ProviderError`]) are fatal for the current pass
//! and propagate to the caller as typed values. Logic-level failures (a tool
//! that failed, an unknown tool, malformed arguments, a broken search round)
//! are absorbed into the conversation or the round record so the model can
//! react. Budget exhaustion is not an error at all; see
//! [`StopReason::Exhausted`](crate::agent::harness::StopReason::Exhausted).

use crate::agent::harness::AgentTranscript;
use crate::review::ReviewVerdict;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ── Provider ───────────────────────────────────────────────────────

/// The language-model provider failed or returned output the core cannot use.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed model output: {0}")]
    Malformed(String),
    #[error("model provider error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Whether a retry at the turn level could plausibly succeed.
    ///
    /// Timeouts, transport failures, rate limits and 5xx responses are
    /// transient. Client errors (400, 401, 403, 404, 422) and malformed
    /// output are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            ProviderError::Malformed(_) | ProviderError::Api(_) => false,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────────

/// Registration and lookup failures of the [`ToolCatalog`](crate::tools::core::ToolCatalog).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// Error returned by a tool callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

impl From<CorpusError> for ToolError {
    fn from(err: CorpusError) -> Self {
        ToolError::Failed(err.to_string())
    }
}

/// Machine-readable kind carried on a failed
/// [`ToolResult`](crate::tools::executor::ToolResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The invocation named a tool the catalog does not expose.
    NotFound,
    /// The arguments were not valid JSON or did not match the schema.
    SchemaValidation,
    /// The callable ran and reported a failure.
    Execution,
    /// The callable did not finish within the tool timeout.
    Timeout,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::SchemaValidation => "schema_validation",
            ToolErrorKind::Execution => "execution",
            ToolErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

// ── Corpus ─────────────────────────────────────────────────────────

/// Failure of a similarity search or record fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorpusError {
    #[error("record '{0}' not found")]
    NotFound(String),
    #[error("corpus backend error: {0}")]
    Backend(String),
    #[error("corpus call timed out after {0:?}")]
    Timeout(Duration),
}

// ── Search ─────────────────────────────────────────────────────────

/// Why a search round produced no usable evidence. Recorded on the
/// [`SearchRoundRecord`](crate::search::SearchRoundRecord), never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SearchRoundError {
    #[error("similarity search failed: {message}")]
    Search { message: String },
    #[error("fetch of '{record_id}' failed: {message}")]
    Fetch { record_id: String, message: String },
    #[error("verification of '{record_id}' failed: {message}")]
    Verify { record_id: String, message: String },
}

// ── Agent passes ───────────────────────────────────────────────────

/// A failed agent pass: the provider error plus whatever the pass had
/// completed before it failed.
#[derive(Debug, Error)]
#[error("agent pass failed after {} iteration(s): {source}", .partial.iterations)]
pub struct AgentError {
    #[source]
    pub source: ProviderError,
    pub partial: Box<AgentTranscript>,
}

impl AgentError {
    pub fn new(source: ProviderError, partial: AgentTranscript) -> Self {
        Self {
            source,
            partial: Box::new(partial),
        }
    }
}

/// A failed user turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The draft pass failed; no answer exists.
    #[error("initial pass failed: {0}")]
    InitialPass(#[source] AgentError),
    /// The improvement pass failed. The draft and its verdict are kept so the
    /// caller can decide whether to show them.
    #[error("improvement pass failed: {source}")]
    ImprovementPass {
        #[source]
        source: AgentError,
        draft: Box<AgentTranscript>,
        verdict: ReviewVerdict,
    },
}

impl TurnError {
    /// The provider error at the root of this failure.
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            TurnError::InitialPass(e) => &e.source,
            TurnError::ImprovementPass { source, .. } => &source.source,
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_provider_errors() {
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ProviderError::Transport("connection reset".into()).is_transient());
        assert!(
            ProviderError::Http {
                status: 429,
                body: "rate limited".into()
            }
            .is_transient()
        );
        assert!(
            ProviderError::Http {
                status: 502,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn permanent_provider_errors() {
        assert!(
            !ProviderError::Http {
                status: 401,
                body: "unauthorized".into()
            }
            .is_transient()
        );
        assert!(!ProviderError::Malformed("not json".into()).is_transient());
        assert!(!ProviderError::Api("model not found".into()).is_transient());
    }

    #[test]
    fn tool_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ToolErrorKind::SchemaValidation).unwrap();
        assert_eq!(json, "\"schema_validation\"");
        assert_eq!(ToolErrorKind::NotFound.to_string(), "not_found");
    }

    #[test]
    fn corpus_error_converts_to_tool_failure() {
        let err: ToolError = CorpusError::NotFound("T-9".into()).into();
        assert_eq!(err, ToolError::Failed("record 'T-9' not found".into()));
    }

    #[test]
    fn search_round_error_display() {
        let err = SearchRoundError::Fetch {
            record_id: "A".into(),
            message: "timeout".into(),
        };
        assert_eq!(err.to_string(), "fetch of 'A' failed: timeout");
    }
}
