//! Convenience re-exports for common `dossier-rs` types.
//!
//! Meant to be glob-imported by hosts:
//!
//! ```ignore
//! use dossier_rs::prelude::*;
//! ```
//!
//! Covers wiring a model, a corpus and a catalog into a [`TurnRunner`] or a
//! standalone [`IterativeSearch`]. Prompt builders, round records and the
//! test doubles are left out; import those from their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::api::model::LanguageModel;
pub use crate::{ChatCompletion, ChatRequest, Message, OpenRouterClient, ToolCall, ToolDef};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::agent::AgentConfig;
pub use crate::config::{DossierConfig, ReviewConfig, SearchConfig};
pub use crate::error::{AgentError, ProviderError, ToolError, TurnError};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentEvent, AgentLoop, AgentTranscript, CompositeEventHandler, ConversationTurn, EventHandler,
    EventLog, FnEventHandler, LoggingHandler, NoopHandler, StopReason,
};

// ── Corpus ──────────────────────────────────────────────────────────
pub use crate::corpus::{
    MemoryCorpus, Record, RecordStore, SearchHit, SimilaritySearch, UserContext,
    UserContextProvider,
};

// ── Search and review ───────────────────────────────────────────────
pub use crate::review::{MergedOutcome, ReviewVerdict, TurnRunner};
pub use crate::search::{IterativeSearch, SearchMode, SearchOutcome};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    EvidenceRef, FnTool, Tool, ToolCatalog, ToolContext, ToolFuture, ToolOutput, ToolSpec,
    default_catalog, parse_tool_args,
};
