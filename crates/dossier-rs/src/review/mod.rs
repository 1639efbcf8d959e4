//! Review and improve: every draft answer is scored and then rewritten in a
//! second agent pass, and the two passes are merged.
//!
//! - [`reviewer`]: [`ResponseReviewer`] and [`ReviewVerdict`].
//! - [`turn`]: [`TurnRunner::run_agent_turn`], the top-level entry point, and
//!   [`MergedOutcome`].

pub mod reviewer;
pub mod turn;

use serde::Serialize;
use std::fmt;

pub use reviewer::{REVIEWER_SYSTEM_PROMPT, ResponseReviewer, ReviewStatus, ReviewVerdict};
pub use turn::{MergedOutcome, TurnRunner};

/// Which of a turn's two agent passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Initial,
    Improvement,
}

impl Pass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pass::Initial => "initial",
            Pass::Improvement => "improvement",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
