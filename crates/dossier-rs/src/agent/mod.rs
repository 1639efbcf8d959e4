//! Agent runtime: the [`AgentLoop`] and its supporting modules.
//!
//! - [`harness::AgentLoop`]: the bounded tool-use loop. Start here.
//! - [`config::AgentConfig`]: model, iteration cap, timeouts, history window.
//! - [`events`]: [`EventHandler`] trait and [`AgentEvent`] enum for observing
//!   the loop, the search controller and the turn runner. Includes
//!   [`LoggingHandler`], [`CompositeEventHandler`], [`FnEventHandler`] and
//!   [`EventLog`].
//! - [`history`]: [`ConversationTurn`] and the fixed history window.
//! - [`prompt`]: [`SystemPromptBuilder`] for multi-section prompt assembly.

pub mod config;
pub mod events;
pub mod execution;
pub mod harness;
pub mod history;
pub mod prompt;

// Re-export commonly used items at the module level.
pub use config::AgentConfig;
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, EventLog, FnEventHandler, LoggingHandler,
    NoopHandler, RecordedEvent, TurnEvent,
};
pub use harness::{AgentLoop, AgentTranscript, StopReason, ToolUsage};
pub use history::ConversationTurn;
pub use prompt::SystemPromptBuilder;
