//! Tool abstractions for the agent loop.
//!
//! Every agent capability (similarity search, record fetch, iterative
//! search, user context) is a [`Tool`] implementor. Tools are registered in a
//! [`ToolCatalog`] and run by a per-pass [`ToolExecutor`], which handles
//! validation, timeouts, truncation, and the audit transcript.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses arguments. Best for simple tools.
//! - **`impl Tool`**: a struct with [`Tool::spec()`] and [`Tool::execute()`].
//!   Best for tools holding shared handles.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolCatalog`], [`FnTool`], [`ToolOutput`].
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder with `when_to_use` /
//!   `when_not_to_use` guidance and the [`Capability`](spec::Capability) tag.
//! - [`executor`]: [`ToolInvocation`], [`ToolResult`], [`ToolExecutor`].
//! - [`reflection`]: failure formatting for model self-correction.
//! - [`records`]: the record-corpus tools and [`default_catalog`].

pub mod core;
pub mod executor;
pub mod records;
pub mod reflection;
pub mod spec;

// Re-export commonly used items at the module level.
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, EvidenceRef, FnTool, StopSignal, Tool, ToolCatalog, ToolContext,
    ToolFuture, ToolOutput, parse_tool_args, truncate_result,
};
pub use executor::{ToolExchange, ToolExecutor, ToolInvocation, ToolOutcome, ToolResult};
pub use records::default_catalog;
pub use spec::{Capability, ToolSpec};
