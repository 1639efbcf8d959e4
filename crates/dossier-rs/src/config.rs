//! Aggregate configuration for a turn: agent loop, iterative search, review.
//!
//! Each section deserializes with `#[serde(default)]`, so a JSON file only
//! needs the keys it overrides:
//!
//! ```json
//! {
//!   "agent": { "max_iterations": 10 },
//!   "search": { "rounds": 3 },
//!   "enabled_tools": ["user_context"]
//! }
//! ```

use crate::DEFAULT_MODEL;
use crate::agent::config::AgentConfig;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// ── Search ─────────────────────────────────────────────────────────

/// Configuration for the [`IterativeSearch`](crate::search::controller::IterativeSearch)
/// controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Refine, search, verify rounds per search. Default: 5.
    pub rounds: u32,
    /// Similarity hits inspected per round for evidence density. Default: 7.
    pub density_window: usize,
    /// Minimum confidence for a reliable outcome. Default: 0.7.
    pub reliability_threshold: f64,
    /// Verification score at or above which a corresponding candidate is strong.
    pub strong_score: u8,
    /// Verification score below which a candidate is weak.
    pub weak_score: u8,
    /// Stop early once one candidate scored 10/10 in this many consecutive
    /// rounds from the start. 0 disables.
    pub short_circuit_after: u32,
    pub search_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub model_timeout_secs: u64,
    /// Characters of a record shown to the verifier.
    pub max_record_chars: usize,
    /// Model for refinement and verification.
    pub model: String,
    pub max_tokens: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            density_window: 7,
            reliability_threshold: 0.7,
            strong_score: 8,
            weak_score: 5,
            short_circuit_after: 3,
            search_timeout_secs: 15,
            fetch_timeout_secs: 15,
            model_timeout_secs: 60,
            max_record_chars: 6_000,
            model: DEFAULT_MODEL.into(),
            max_tokens: 1024,
        }
    }
}

impl SearchConfig {
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_short_circuit_after(mut self, rounds: u32) -> Self {
        self.short_circuit_after = rounds;
        self
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Worst-case wall time of one whole search: every round refines,
    /// searches, fetches and verifies (fetches and verifications run
    /// concurrently within a round), then one plain search plus title
    /// fetches for the fallback.
    pub fn time_budget(&self) -> Duration {
        let lookup = self.search_timeout() + self.fetch_timeout();
        let round = self.model_timeout() * 2 + lookup;
        round * self.rounds + lookup
    }
}

// ── Review ─────────────────────────────────────────────────────────

/// Rubric and model settings for the response reviewer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub format_weight: f64,
    pub completeness_weight: f64,
    pub justification_weight: f64,
    /// Weighted score (0-100) needed for an approved verdict. Default: 80.
    pub approval_threshold: f64,
    pub model: String,
    pub model_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            format_weight: 0.30,
            completeness_weight: 0.40,
            justification_weight: 0.30,
            approval_threshold: 80.0,
            model: DEFAULT_MODEL.into(),
            model_timeout_secs: 60,
            max_tokens: 1024,
        }
    }
}

impl ReviewConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_approval_threshold(mut self, threshold: f64) -> Self {
        self.approval_threshold = threshold;
        self
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

// ── Aggregate ──────────────────────────────────────────────────────

/// Everything a host needs to run turns and searches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DossierConfig {
    pub agent: AgentConfig,
    pub search: SearchConfig,
    pub review: ReviewConfig,
    /// Opt-in tools to expose, by name.
    pub enabled_tools: Vec<String>,
}

impl DossierConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Use one model for every stage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.agent.model = model.clone();
        self.search.model = model.clone();
        self.review.model = model;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid("agent.max_iterations must be at least 1".into()));
        }
        if self.search.rounds == 0 {
            return Err(ConfigError::Invalid("search.rounds must be at least 1".into()));
        }
        if self.search.density_window == 0 {
            return Err(ConfigError::Invalid("search.density_window must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.search.reliability_threshold) {
            return Err(ConfigError::Invalid(format!(
                "search.reliability_threshold must be within 0..=1, got {}",
                self.search.reliability_threshold
            )));
        }
        if self.search.strong_score > 10 || self.search.weak_score > self.search.strong_score {
            return Err(ConfigError::Invalid(format!(
                "search scores must satisfy weak_score <= strong_score <= 10, got {} and {}",
                self.search.weak_score, self.search.strong_score
            )));
        }
        let r = &self.review;
        let sum = r.format_weight + r.completeness_weight + r.justification_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "review weights must sum to 1.0, got {sum}"
            )));
        }
        if !(0.0..=100.0).contains(&r.approval_threshold) {
            return Err(ConfigError::Invalid(format!(
                "review.approval_threshold must be within 0..=100, got {}",
                r.approval_threshold
            )));
        }
        Ok(())
    }
}
