//! Iterative search-and-verify: higher-precision record lookup than a single
//! similarity query.
//!
//! Each round refines the query, runs a similarity search, fetches the
//! candidates' full records, and has the model verify whether they really
//! correspond to the request. Round records are typed and only rendered to
//! text at the refinement prompt. After the last round, candidates are
//! aggregated and ranked, and the controller either selects with a
//! confidence score or reports that no reliable match exists.
//!
//! - [`controller`]: [`IterativeSearch`](controller::IterativeSearch).
//! - [`refiner`]: [`QueryRefiner`](refiner::QueryRefiner).
//! - [`verifier`]: [`ContentVerifier`](verifier::ContentVerifier).
//! - [`aggregate`]: candidate ranking, confidence, selection.

pub mod aggregate;
pub mod controller;
pub mod refiner;
pub mod verifier;

use crate::error::SearchRoundError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use controller::IterativeSearch;

/// Whether a search wants one record or a short list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Best,
    Top,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Best => write!(f, "best"),
            SearchMode::Top => write!(f, "top"),
        }
    }
}

// ── Round records ──────────────────────────────────────────────────

/// One candidate examined in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateCheck {
    pub record_id: String,
    pub title: String,
    /// Share of the round's top similarity hits that landed on this record.
    pub density: f64,
    /// Verification score, 0-10.
    pub score: u8,
    pub corresponds: bool,
    pub reasoning: String,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    /// Set when the fetch or verification failed; the check then counts as
    /// zero evidence.
    pub error: Option<SearchRoundError>,
}

impl CandidateCheck {
    /// A zero-evidence check for a candidate whose fetch or verify failed.
    pub fn failed(record_id: impl Into<String>, density: f64, error: SearchRoundError) -> Self {
        Self {
            record_id: record_id.into(),
            title: String::new(),
            density,
            score: 0,
            corresponds: false,
            reasoning: String::new(),
            matched: Vec::new(),
            missing: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// What a round tells the next refinement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundFeedback {
    /// A corresponding candidate at or above the strong score.
    Strong { record_id: String, score: u8 },
    /// A plausible candidate with gaps.
    Partial {
        record_id: String,
        score: u8,
        missing: Vec<String>,
    },
    /// Nothing close.
    Weak { record_id: String, score: u8 },
    /// The round produced no evidence.
    Failed { reason: String },
}

impl RoundFeedback {
    /// Text handed to the next refinement prompt.
    pub fn render(&self) -> String {
        match self {
            RoundFeedback::Strong { record_id, score } => format!(
                "strong candidate {record_id} ({score}/10); confirm it with a different phrasing"
            ),
            RoundFeedback::Partial {
                record_id,
                score,
                missing,
            } if missing.is_empty() => format!(
                "partial match {record_id} ({score}/10); make the query more specific"
            ),
            RoundFeedback::Partial {
                record_id,
                score,
                missing,
            } => format!(
                "partial match {record_id} ({score}/10); missing: {}",
                missing.join(", ")
            ),
            RoundFeedback::Weak { record_id, score } => format!(
                "weak result {record_id} ({score}/10); try a different angle"
            ),
            RoundFeedback::Failed { reason } => {
                format!("no usable evidence ({reason}); try broader wording")
            }
        }
    }
}

/// Everything one round did. Emitted as an event; not kept in the outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRoundRecord {
    /// 1-based.
    pub round: u32,
    pub query: String,
    /// Whether `query` came from the refiner rather than the original request.
    pub refined: bool,
    pub candidates: Vec<CandidateCheck>,
    /// Set when the similarity search itself failed.
    pub error: Option<SearchRoundError>,
    pub feedback: RoundFeedback,
}

impl SearchRoundRecord {
    /// The highest-scoring verified candidate of the round, first on ties.
    pub fn best_check(&self) -> Option<&CandidateCheck> {
        self.candidates
            .iter()
            .filter(|c| !c.is_failed())
            .fold(None, |best: Option<&CandidateCheck>, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            })
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// Aggregate view of one candidate across rounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub record_id: String,
    pub title: String,
    /// Rounds in which the candidate was verified.
    pub appearances: u32,
    pub mean_score: f64,
    pub mean_density: f64,
    /// Density per appearance, in round order.
    pub density_progression: Vec<f64>,
    pub first_seen_round: u32,
    /// Verified as corresponding in at least one round.
    pub ever_corresponds: bool,
}

/// Result of one iterative search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub mode: SearchMode,
    /// Selected record ids, best first. Empty when nothing corresponds.
    pub selected: Vec<String>,
    /// Ranked summaries of every candidate seen.
    pub candidates: Vec<CandidateSummary>,
    pub reliable: bool,
    /// 0.0-1.0.
    pub confidence: f64,
    pub justification: String,
    pub rounds_completed: u32,
    pub unique_candidates: usize,
    /// Verified appearances per record id.
    pub appearances: BTreeMap<String, u32>,
    /// The stop signal ended the search early.
    pub cancelled: bool,
}

impl SearchOutcome {
    /// Summary of the top selected candidate.
    pub fn winner(&self) -> Option<&CandidateSummary> {
        let id = self.selected.first()?;
        self.candidates.iter().find(|c| &c.record_id == id)
    }
}
