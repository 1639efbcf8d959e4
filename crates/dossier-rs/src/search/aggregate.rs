//! Aggregation and selection across search rounds.
//!
//! Candidates are ranked by mean verification score, then mean evidence
//! density, then appearances, then the round they were first seen in. Only
//! candidates verified as corresponding at least once are selectable.
//!
//! Confidence for the winner is
//! `mean_score / 10 * (0.5 + 0.5 * appearances / rounds_completed)`:
//! verification quality scaled by how consistently the rounds converged.

use super::{CandidateSummary, SearchMode, SearchOutcome, SearchRoundRecord};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Default)]
struct Accumulator {
    title: String,
    appearances: u32,
    score_sum: f64,
    density: Vec<f64>,
    first_seen_round: u32,
    ever_corresponds: bool,
}

/// Per-candidate summaries, ranked best first.
///
/// Failed checks (fetch or verify errors) are zero evidence and do not count
/// as appearances. A record checked twice in one round counts once.
pub fn summarize(rounds: &[SearchRoundRecord]) -> Vec<CandidateSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for round in rounds {
        let mut seen_this_round = HashSet::new();
        for check in round.candidates.iter().filter(|c| !c.is_failed()) {
            if !seen_this_round.insert(check.record_id.as_str()) {
                continue;
            }
            let entry = acc.entry(check.record_id.clone()).or_insert_with(|| {
                order.push(check.record_id.clone());
                Accumulator {
                    first_seen_round: round.round,
                    ..Default::default()
                }
            });
            if entry.title.is_empty() {
                entry.title = check.title.clone();
            }
            entry.appearances += 1;
            entry.score_sum += f64::from(check.score);
            entry.density.push(check.density);
            entry.ever_corresponds |= check.corresponds;
        }
    }

    let mut summaries: Vec<CandidateSummary> = order
        .into_iter()
        .filter_map(|id| {
            let a = acc.remove(&id)?;
            let n = f64::from(a.appearances.max(1));
            Some(CandidateSummary {
                record_id: id,
                title: a.title,
                appearances: a.appearances,
                mean_score: a.score_sum / n,
                mean_density: a.density.iter().sum::<f64>() / n,
                density_progression: a.density,
                first_seen_round: a.first_seen_round,
                ever_corresponds: a.ever_corresponds,
            })
        })
        .collect();

    summaries.sort_by(rank_order);
    summaries
}

/// Ranking comparator: best candidate first.
pub fn rank_order(a: &CandidateSummary, b: &CandidateSummary) -> Ordering {
    b.mean_score
        .total_cmp(&a.mean_score)
        .then_with(|| b.mean_density.total_cmp(&a.mean_density))
        .then_with(|| b.appearances.cmp(&a.appearances))
        .then_with(|| a.first_seen_round.cmp(&b.first_seen_round))
}

/// Confidence in `winner` after `rounds_completed` rounds, in 0.0-1.0.
pub fn confidence(winner: &CandidateSummary, rounds_completed: u32) -> f64 {
    if rounds_completed == 0 {
        return 0.0;
    }
    let agreement = f64::from(winner.appearances) / f64::from(rounds_completed);
    let raw = (winner.mean_score / 10.0) * (0.5 + 0.5 * agreement.min(1.0));
    ((raw * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}

/// Build the outcome of a search from its round records.
pub fn resolve(
    query: &str,
    mode: SearchMode,
    limit: usize,
    rounds: &[SearchRoundRecord],
    reliability_threshold: f64,
    cancelled: bool,
) -> SearchOutcome {
    let candidates = summarize(rounds);
    let rounds_completed = rounds.len() as u32;
    let take = match mode {
        SearchMode::Best => 1,
        SearchMode::Top => limit.max(1),
    };

    let selected: Vec<String> = candidates
        .iter()
        .filter(|c| c.ever_corresponds)
        .take(take)
        .map(|c| c.record_id.clone())
        .collect();

    let winner = selected
        .first()
        .and_then(|id| candidates.iter().find(|c| &c.record_id == id));
    let confidence = winner.map_or(0.0, |w| confidence(w, rounds_completed));
    let reliable = winner.is_some() && confidence >= reliability_threshold;

    let justification = match winner {
        Some(w) => format!(
            "{} was verified in {} of {} round(s) with mean score {:.1}/10 and mean density {:.2}; \
             confidence {:.2} is {} the {:.2} threshold",
            w.record_id,
            w.appearances,
            rounds_completed,
            w.mean_score,
            w.mean_density,
            confidence,
            if reliable { "at or above" } else { "below" },
            reliability_threshold,
        ),
        None => format!(
            "no candidate was verified as corresponding in {rounds_completed} round(s); \
             there is no reliable match"
        ),
    };

    let appearances: BTreeMap<String, u32> = candidates
        .iter()
        .map(|c| (c.record_id.clone(), c.appearances))
        .collect();

    SearchOutcome {
        query: query.to_string(),
        mode,
        selected,
        unique_candidates: candidates.len(),
        candidates,
        reliable,
        confidence,
        justification,
        rounds_completed,
        appearances,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchRoundError;
    use crate::search::{CandidateCheck, RoundFeedback};

    fn check(id: &str, score: u8, density: f64) -> CandidateCheck {
        CandidateCheck {
            record_id: id.into(),
            title: format!("Record {id}"),
            density,
            score,
            corresponds: score >= 5,
            reasoning: String::new(),
            matched: vec![],
            missing: vec![],
            error: None,
        }
    }

    fn round(n: u32, candidates: Vec<CandidateCheck>) -> SearchRoundRecord {
        SearchRoundRecord {
            round: n,
            query: format!("q{n}"),
            refined: n > 1,
            candidates,
            error: None,
            feedback: RoundFeedback::Failed {
                reason: "unused".into(),
            },
        }
    }

    #[test]
    fn mixed_rounds_select_majority_winner() {
        let rounds = vec![
            round(1, vec![check("A", 9, 0.6)]),
            round(2, vec![check("B", 4, 0.3)]),
            round(3, vec![check("A", 9, 0.7)]),
            round(4, vec![check("C", 7, 0.4)]),
            round(5, vec![check("A", 9, 0.6)]),
        ];
        let outcome = resolve("q", SearchMode::Best, 1, &rounds, 0.7, false);
        assert_eq!(outcome.selected, vec!["A".to_string()]);
        assert_eq!(outcome.appearances["A"], 3);
        assert!(outcome.reliable);
        assert!((outcome.confidence - 0.72).abs() < 1e-9);
        assert_eq!(outcome.unique_candidates, 3);
        assert_eq!(outcome.winner().unwrap().density_progression, vec![0.6, 0.7, 0.6]);
    }

    #[test]
    fn ties_break_on_density_then_appearances_then_first_seen() {
        let rounds = vec![
            round(1, vec![check("A", 8, 0.5)]),
            round(2, vec![check("B", 8, 0.5)]),
            round(3, vec![check("C", 8, 0.9)]),
        ];
        let ranked: Vec<_> = summarize(&rounds).into_iter().map(|c| c.record_id).collect();
        assert_eq!(ranked, vec!["C", "A", "B"]);

        let rounds = vec![
            round(1, vec![check("A", 8, 0.5)]),
            round(2, vec![check("B", 8, 0.5)]),
            round(3, vec![check("B", 8, 0.5)]),
        ];
        let ranked: Vec<_> = summarize(&rounds).into_iter().map(|c| c.record_id).collect();
        assert_eq!(ranked, vec!["B", "A"]);
    }

    #[test]
    fn non_corresponding_candidates_are_never_selected() {
        let rounds = vec![
            round(1, vec![check("A", 3, 0.9)]),
            round(2, vec![check("A", 2, 0.9)]),
        ];
        let outcome = resolve("q", SearchMode::Best, 1, &rounds, 0.7, false);
        assert!(outcome.selected.is_empty());
        assert_eq!(outcome.confidence, 0.0);
        assert!(!outcome.reliable);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn failed_checks_are_zero_evidence() {
        let failed = CandidateCheck::failed(
            "A",
            1.0,
            SearchRoundError::Fetch {
                record_id: "A".into(),
                message: "timeout".into(),
            },
        );
        let rounds = vec![round(1, vec![failed.clone()]), round(2, vec![failed])];
        let outcome = resolve("q", SearchMode::Best, 1, &rounds, 0.7, false);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.selected.is_empty());
        assert_eq!(outcome.rounds_completed, 2);
    }

    #[test]
    fn top_mode_selects_unique_candidates_up_to_limit() {
        let rounds = vec![
            round(1, vec![check("A", 9, 0.4), check("B", 7, 0.3), check("A", 9, 0.4)]),
            round(2, vec![check("B", 8, 0.3), check("C", 6, 0.2), check("D", 2, 0.1)]),
        ];
        let outcome = resolve("q", SearchMode::Top, 2, &rounds, 0.7, false);
        assert_eq!(outcome.selected, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(outcome.appearances["A"], 1);

        let all = resolve("q", SearchMode::Top, 10, &rounds, 0.7, false);
        assert_eq!(all.selected.len(), 3);
    }

    #[test]
    fn confidence_is_zero_without_rounds() {
        let summary = CandidateSummary {
            record_id: "A".into(),
            title: String::new(),
            appearances: 0,
            mean_score: 10.0,
            mean_density: 1.0,
            density_progression: vec![],
            first_seen_round: 1,
            ever_corresponds: true,
        };
        assert_eq!(confidence(&summary, 0), 0.0);
    }
}
