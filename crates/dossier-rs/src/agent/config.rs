//! Configuration for the [`AgentLoop`](super::harness::AgentLoop).
//!
//! Every field has a default, so a JSON config file may override any subset:
//!
//! ```ignore
//! let config = AgentConfig::default()
//!     .with_model("anthropic/claude-sonnet-4")
//!     .with_max_iterations(10)
//!     .with_history_window(6)
//!     .with_retries(2);
//! ```

use crate::DEFAULT_MODEL;
use crate::api::retry::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

/// Agent loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider.
    pub model: String,
    /// Hard cap on decision iterations per pass. Default: 15.
    pub max_iterations: u32,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Number of prior conversation turns included as context. Default: 10.
    pub history_window: usize,
    /// Timeout for each model call, in seconds.
    pub model_timeout_secs: u64,
    /// Timeout for each tool execution, in seconds.
    pub tool_timeout_secs: u64,
    /// Run independent tool calls of one iteration concurrently.
    pub parallel_tools: bool,
    /// Retries when the model returns neither text nor tool calls.
    pub empty_response_retries: u32,
    /// Byte cap on tool output sent back to the model.
    pub max_result_bytes: usize,
    /// Retry policy for transient provider errors. Default: no retries.
    pub retry: RetryConfig,
    /// Replaces the built-in agent system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_iterations: 15,
            max_tokens: 4096,
            temperature: 0.2,
            history_window: 10,
            model_timeout_secs: 60,
            tool_timeout_secs: 30,
            parallel_tools: true,
            empty_response_retries: 2,
            max_result_bytes: crate::tools::core::DEFAULT_MAX_RESULT_BYTES,
            retry: RetryConfig::default(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_history_window(mut self, turns: usize) -> Self {
        self.history_window = turns;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
