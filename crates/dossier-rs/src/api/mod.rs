//! Provider-facing layer: the language-model capability, timeouts, retry
//! policy, and correlation IDs.
//!
//! - [`model`]: [`LanguageModel`] trait, [`call_model`] with an explicit
//!   timeout, JSON-mode helpers for structured replies.
//! - [`retry`]: opt-in exponential backoff for transient provider errors.
//! - [`tracing`]: `trace_id` / `span_id` generation.

pub mod model;
pub mod retry;
pub mod tracing;

pub use model::{LanguageModel, ModelFuture, call_model, call_model_with_retry, parse_json_reply};
pub use retry::RetryConfig;
pub use tracing::{generate_span_id, generate_trace_id};
