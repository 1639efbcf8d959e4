//! The iterative search controller.

use super::aggregate;
use super::refiner::{QueryRefiner, RefinementContext};
use super::verifier::ContentVerifier;
use super::{CandidateCheck, RoundFeedback, SearchMode, SearchOutcome, SearchRoundRecord};
use crate::agent::events::{AgentEvent, EventHandler, NoopHandler};
use crate::api::model::LanguageModel;
use crate::config::SearchConfig;
use crate::corpus::{
    RecordStore, SearchHit, SimilaritySearch, UserContextProvider, fetch_with_timeout,
    search_with_timeout,
};
use crate::error::SearchRoundError;
use crate::tools::core::ToolContext;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on `limit` in top-K mode.
pub const MAX_TOP_LIMIT: usize = 10;

/// Runs refine, search, verify rounds and resolves them into a
/// [`SearchOutcome`].
///
/// Shared across turns behind an `Arc`; every call keeps its round records
/// local. Infrastructure failures never abort a search: a failed similarity
/// search, fetch or verification is recorded as a zero-evidence round or
/// candidate and the next round runs.
///
/// ```ignore
/// let search = IterativeSearch::new(model, corpus.clone(), corpus, SearchConfig::default())
///     .with_event_handler(Arc::new(LoggingHandler));
/// let outcome = search.run_iterative_search("road maintenance in Leon", SearchMode::Best, 1).await;
/// if !outcome.reliable {
///     // fall back to a plain similarity search
/// }
/// ```
pub struct IterativeSearch {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn SimilaritySearch>,
    store: Arc<dyn RecordStore>,
    user_context: Option<Arc<dyn UserContextProvider>>,
    config: SearchConfig,
    event_handler: Arc<dyn EventHandler>,
    stop_signal: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl IterativeSearch {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SimilaritySearch>,
        store: Arc<dyn RecordStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            model,
            search,
            store,
            user_context: None,
            config,
            event_handler: Arc::new(NoopHandler),
            stop_signal: None,
        }
    }

    /// Profile and saved items fed to the refiner.
    pub fn with_user_context(mut self, provider: Arc<dyn UserContextProvider>) -> Self {
        self.user_context = Some(provider);
        self
    }

    /// Handler for standalone searches. Searches run from a tool report to
    /// the turn's handler instead.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.stop_signal = Some(Arc::new(signal));
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Standalone entry point for best-match and top-K queries.
    pub async fn run_iterative_search(&self, query: &str, mode: SearchMode, limit: usize) -> SearchOutcome {
        let ctx = ToolContext::new(self.event_handler.as_ref(), self.stop_signal.as_deref());
        self.run_in_context(query, mode, limit, ctx, None).await
    }

    /// Run a search reporting to `ctx.events` and stopping on
    /// `ctx.stop_signal`. `hint` is extra context for the refiner.
    pub async fn run_in_context(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        ctx: ToolContext<'_>,
        hint: Option<&str>,
    ) -> SearchOutcome {
        let per_round = match mode {
            SearchMode::Best => 1,
            SearchMode::Top => limit.clamp(1, MAX_TOP_LIMIT),
        };
        let top_k = self.config.density_window.max(per_round);
        info!(
            "Iterative search ({mode}, {} round(s), {per_round} candidate(s)/round): {query}",
            self.config.rounds
        );

        let user_context = match &self.user_context {
            Some(provider) => provider.user_context().await,
            None => None,
        };
        let refiner = QueryRefiner::new(
            self.model.as_ref(),
            &self.config.model,
            self.config.model_timeout(),
        )
        .with_max_tokens(self.config.max_tokens);
        let verifier = ContentVerifier::new(
            self.model.as_ref(),
            &self.config.model,
            self.config.model_timeout(),
        )
        .with_max_record_chars(self.config.max_record_chars)
        .with_max_tokens(self.config.max_tokens);

        let mut rounds: Vec<SearchRoundRecord> = Vec::new();
        let mut cancelled = false;

        for round in 1..=self.config.rounds {
            if ctx.is_cancelled() {
                info!("Iterative search cancelled before round {round}");
                cancelled = true;
                break;
            }

            let (round_query, refined) = if round == 1 {
                (query.to_string(), false)
            } else {
                refiner
                    .refine_or_original(&RefinementContext {
                        original: query,
                        prior_rounds: &rounds,
                        user_context: user_context.as_ref(),
                        hint,
                    })
                    .await
            };

            let record = self
                .run_round(round, round_query, refined, query, per_round, top_k, &verifier)
                .await;
            ctx.events.on_event(&AgentEvent::SearchRound(&record));
            rounds.push(record);

            if mode == SearchMode::Best && self.converged(&rounds) {
                debug!("Same candidate scored 10/10 in rounds 1..={round}; stopping early");
                break;
            }
        }

        let outcome = aggregate::resolve(
            query,
            mode,
            per_round,
            &rounds,
            self.config.reliability_threshold,
            cancelled,
        );
        info!(
            "Iterative search done: selected={:?} confidence={:.2} reliable={}",
            outcome.selected, outcome.confidence, outcome.reliable
        );
        ctx.events.on_event(&AgentEvent::SearchResolved(&outcome));
        outcome
    }

    /// One refine, search, verify round. Never fails; errors are recorded.
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        round: u32,
        query: String,
        refined: bool,
        request: &str,
        per_round: usize,
        top_k: usize,
        verifier: &ContentVerifier<'_>,
    ) -> SearchRoundRecord {
        let hits = match search_with_timeout(
            self.search.as_ref(),
            &query,
            top_k,
            self.config.search_timeout(),
        )
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                debug!("Round {round}: similarity search failed: {e}");
                let error = SearchRoundError::Search {
                    message: e.to_string(),
                };
                return SearchRoundRecord {
                    round,
                    query,
                    refined,
                    candidates: Vec::new(),
                    feedback: RoundFeedback::Failed {
                        reason: error.to_string(),
                    },
                    error: Some(error),
                };
            }
        };

        let candidate_ids = unique_ids(&hits, per_round);
        let window = self.config.density_window;
        let checks = futures::future::join_all(candidate_ids.iter().map(|id| {
            let density = evidence_density(&hits, id, window);
            self.check_candidate(id, density, request, verifier)
        }))
        .await;

        let feedback = feedback_for(&checks, &self.config);
        debug!("Round {round} ({query:?}): {}", feedback.render());
        SearchRoundRecord {
            round,
            query,
            refined,
            candidates: checks,
            error: None,
            feedback,
        }
    }

    async fn check_candidate(
        &self,
        record_id: &str,
        density: f64,
        request: &str,
        verifier: &ContentVerifier<'_>,
    ) -> CandidateCheck {
        let record =
            match fetch_with_timeout(self.store.as_ref(), record_id, self.config.fetch_timeout()).await {
                Ok(r) => r,
                Err(e) => {
                    return CandidateCheck::failed(
                        record_id,
                        density,
                        SearchRoundError::Fetch {
                            record_id: record_id.to_string(),
                            message: e.to_string(),
                        },
                    );
                }
            };

        match verifier.verify(request, &record).await {
            Ok(v) => CandidateCheck {
                record_id: record.id,
                title: record.title,
                density,
                score: v.score,
                corresponds: v.corresponds,
                reasoning: v.reasoning,
                matched: v.matched_aspects,
                missing: v.missing_aspects,
                error: None,
            },
            Err(e) => CandidateCheck::failed(
                record_id,
                density,
                SearchRoundError::Verify {
                    record_id: record_id.to_string(),
                    message: e.to_string(),
                },
            ),
        }
    }

    /// The first `short_circuit_after` rounds all picked the same record with
    /// a perfect, corresponding verification.
    fn converged(&self, rounds: &[SearchRoundRecord]) -> bool {
        let n = self.config.short_circuit_after as usize;
        if n == 0 || rounds.len() != n || rounds.len() >= self.config.rounds as usize {
            return false;
        }
        let mut ids = rounds.iter().map(|r| {
            r.best_check()
                .filter(|c| c.score == 10 && c.corresponds)
                .map(|c| c.record_id.as_str())
        });
        match ids.next().flatten() {
            Some(first) => ids.all(|id| id == Some(first)),
            None => false,
        }
    }
}

/// Distinct record ids in hit order, at most `limit`.
fn unique_ids(hits: &[SearchHit], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.record_id.as_str()))
        .take(limit)
        .map(|h| h.record_id.clone())
        .collect()
}

/// Share of the first `window` hits that belong to `record_id`.
pub fn evidence_density(hits: &[SearchHit], record_id: &str, window: usize) -> f64 {
    if window == 0 {
        return 0.0;
    }
    let count = hits
        .iter()
        .take(window)
        .filter(|h| h.record_id == record_id)
        .count();
    count as f64 / window as f64
}

fn feedback_for(checks: &[CandidateCheck], config: &SearchConfig) -> RoundFeedback {
    let best = checks
        .iter()
        .filter(|c| !c.is_failed())
        .fold(None, |best: Option<&CandidateCheck>, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        });
    match best {
        None => RoundFeedback::Failed {
            reason: checks
                .iter()
                .find_map(|c| c.error.as_ref().map(ToString::to_string))
                .unwrap_or_else(|| "similarity search returned no hits".into()),
        },
        Some(b) if b.corresponds && b.score >= config.strong_score => RoundFeedback::Strong {
            record_id: b.record_id.clone(),
            score: b.score,
        },
        Some(b) if b.score >= config.weak_score => RoundFeedback::Partial {
            record_id: b.record_id.clone(),
            score: b.score,
            missing: b.missing.clone(),
        },
        Some(b) => RoundFeedback::Weak {
            record_id: b.record_id.clone(),
            score: b.score,
        },
    }
}
