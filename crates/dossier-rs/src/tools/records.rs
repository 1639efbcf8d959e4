//! Domain tools over the record corpus.
//!
//! | Tool | Name | Capability |
//! |------|------|------------|
//! | [`SearchRecords`] | `search_records` | always on |
//! | [`FetchRecord`] | `fetch_record` | always on |
//! | [`FindBestMatch`] | `find_best_match` | always on |
//! | [`FindTopMatches`] | `find_top_matches` | always on |
//! | [`UserContextTool`] | `user_context` | opt-in |
//!
//! The two iterative tools run [`IterativeSearch`] with the turn's
//! [`ToolContext`], so their rounds show up in the turn's event stream and
//! stop with the turn.

use super::core::{
    EvidenceRef, Tool, ToolCatalog, ToolContext, ToolFuture, ToolOutput, parse_tool_args,
};
use super::spec::ToolSpec;
use crate::corpus::{
    RecordStore, SearchHit, SimilaritySearch, UserContextProvider, fetch_with_timeout,
    search_with_timeout,
};
use crate::error::{CatalogError, ToolError};
use crate::search::controller::MAX_TOP_LIMIT;
use crate::search::{IterativeSearch, SearchMode, SearchOutcome};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ── Defaults ───────────────────────────────────────────────────────

/// Results returned by `search_records` when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Upper bound on `search_records` results.
pub const MAX_SEARCH_LIMIT: usize = 20;

/// Characters of a record returned by `fetch_record`.
pub const DEFAULT_FETCH_CHARS: usize = 8_000;

// ── Typed argument structs ─────────────────────────────────────────

/// Typed arguments for `search_records`.
#[derive(Deserialize, JsonSchema)]
pub struct SearchRecordsArgs {
    /// Free-text description of what to look for.
    pub query: String,
    /// Number of records to return (default 5, max 20).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Typed arguments for `fetch_record`.
#[derive(Deserialize, JsonSchema)]
pub struct FetchRecordArgs {
    /// Record id exactly as returned by a search tool (e.g. 'T-1042').
    pub record_id: String,
}

/// Typed arguments for `find_best_match`.
#[derive(Deserialize, JsonSchema)]
pub struct FindBestMatchArgs {
    /// Description of the single record wanted.
    pub query: String,
    /// Extra context from the conversation that should steer query refinement.
    #[serde(default)]
    pub context: Option<String>,
}

/// Typed arguments for `find_top_matches`.
#[derive(Deserialize, JsonSchema)]
pub struct FindTopMatchesArgs {
    /// Description of the records wanted.
    pub query: String,
    /// How many verified records to return (1 to 10, default 5).
    #[serde(default)]
    #[schemars(range(min = 1, max = 10))]
    pub limit: Option<usize>,
    /// Extra context from the conversation that should steer query refinement.
    #[serde(default)]
    pub context: Option<String>,
}

/// `user_context` takes no arguments.
#[derive(Deserialize, JsonSchema)]
pub struct UserContextArgs {}

// ── Shared plain search ────────────────────────────────────────────

/// Unique records from `hits`, best score first, at most `limit`.
fn unique_hits(hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut out: Vec<SearchHit> = Vec::new();
    for hit in hits {
        match out.iter().position(|h| h.record_id == hit.record_id) {
            Some(i) if hit.score > out[i].score => out[i] = hit,
            Some(_) => {}
            None => out.push(hit),
        }
    }
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out.truncate(limit);
    out
}

/// Similarity search plus a title lookup for each unique hit.
async fn plain_search(
    search: &dyn SimilaritySearch,
    store: &dyn RecordStore,
    query: &str,
    limit: usize,
    search_timeout: Duration,
    fetch_timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    // Several chunks of one record may match; over-fetch so `limit` unique
    // records survive deduplication.
    let hits = search_with_timeout(search, query, limit * 3, search_timeout).await?;
    let hits = unique_hits(hits, limit);
    if hits.is_empty() {
        return Ok(ToolOutput::text(format!("No records matched \"{query}\".")));
    }

    let fetched = join_all(
        hits.iter()
            .map(|h| fetch_with_timeout(store, &h.record_id, fetch_timeout)),
    )
    .await;

    let mut text = format!("{} record(s) for \"{query}\":\n", hits.len());
    let mut evidence = Vec::new();
    for (rank, (hit, record)) in hits.iter().zip(fetched).enumerate() {
        match record {
            Ok(record) => {
                text.push_str(&format!(
                    "{}. [{}] {} (score {:.2})\n",
                    rank + 1,
                    record.id,
                    record.title,
                    hit.score
                ));
                evidence.push(EvidenceRef::new(record.id, record.title));
            }
            Err(e) => {
                debug!("Title lookup for {} failed: {e}", hit.record_id);
                text.push_str(&format!(
                    "{}. [{}] (title unavailable) (score {:.2})\n",
                    rank + 1,
                    hit.record_id,
                    hit.score
                ));
            }
        }
    }
    Ok(ToolOutput::text(text).with_evidence(evidence))
}

// ── SearchRecords ──────────────────────────────────────────────────

/// One-shot similarity search, no verification.
pub struct SearchRecords {
    search: Arc<dyn SimilaritySearch>,
    store: Arc<dyn RecordStore>,
    search_timeout: Duration,
    fetch_timeout: Duration,
}

impl SearchRecords {
    pub fn new(search: Arc<dyn SimilaritySearch>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            search,
            store,
            search_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeouts(mut self, search: Duration, fetch: Duration) -> Self {
        self.search_timeout = search;
        self.fetch_timeout = fetch;
        self
    }
}

impl Tool for SearchRecords {
    fn spec(&self) -> ToolSpec {
        ToolSpec::builder("search_records", "Run a quick similarity search over the records")
            .when_to_use("Exploring what the corpus holds, or listing candidates to read next")
            .when_not_to_use(
                "You need the one record that fits a description; use find_best_match, \
                 which verifies candidates",
            )
            .parameters_for::<SearchRecordsArgs>()
            .example(
                r#"{"query": "bridge inspection contracts"}"#,
                "3 record(s) ...\n1. [T-12] Bridge inspection 2024 (score 0.81)",
            )
            .output_format("Numbered list of record id, title and similarity score")
            .build()
    }

    fn execute<'a>(&'a self, arguments: serde_json::Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: SearchRecordsArgs = parse_tool_args(arguments)?;
            let limit = args
                .limit
                .unwrap_or(DEFAULT_SEARCH_LIMIT)
                .clamp(1, MAX_SEARCH_LIMIT);
            plain_search(
                self.search.as_ref(),
                self.store.as_ref(),
                &args.query,
                limit,
                self.search_timeout,
                self.fetch_timeout,
            )
            .await
        })
    }
}

// ── FetchRecord ────────────────────────────────────────────────────

/// Read one record in full.
pub struct FetchRecord {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
    max_chars: usize,
}

impl FetchRecord {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(15),
            max_chars: DEFAULT_FETCH_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_chars(mut self, max: usize) -> Self {
        self.max_chars = max;
        self
    }
}

impl Tool for FetchRecord {
    fn spec(&self) -> ToolSpec {
        ToolSpec::builder("fetch_record", "Read one record in full by its id")
            .when_to_use("You have a record id from a search and need its fields and text")
            .when_not_to_use("You do not know the id yet; search first")
            .parameters_for::<FetchRecordArgs>()
            .example(r#"{"record_id": "T-12"}"#, "[T-12] Bridge inspection 2024\nbudget: ...")
            .output_format("The record's title, fields and body")
            .build()
    }

    fn execute<'a>(&'a self, arguments: serde_json::Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: FetchRecordArgs = parse_tool_args(arguments)?;
            let record = fetch_with_timeout(self.store.as_ref(), &args.record_id, self.timeout).await?;
            let evidence = EvidenceRef::new(record.id.clone(), record.title.clone());
            Ok(ToolOutput::text(record.render(self.max_chars)).with_evidence([evidence]))
        })
    }
}

// ── Iterative search tools ─────────────────────────────────────────

fn render_outcome(outcome: &SearchOutcome) -> String {
    let mut out = format!(
        "Verified over {} round(s), {} unique candidate(s), confidence {:.2}.\n",
        outcome.rounds_completed, outcome.unique_candidates, outcome.confidence
    );
    for (rank, id) in outcome.selected.iter().enumerate() {
        if let Some(c) = outcome.candidates.iter().find(|c| &c.record_id == id) {
            out.push_str(&format!(
                "{}. [{}] {} (mean score {:.1}/10, seen in {} round(s))\n",
                rank + 1,
                c.record_id,
                c.title,
                c.mean_score,
                c.appearances
            ));
        }
    }
    if !outcome.justification.is_empty() {
        out.push_str(&format!("Why: {}\n", outcome.justification));
    }
    out
}

fn selected_evidence(outcome: &SearchOutcome) -> Vec<EvidenceRef> {
    outcome
        .selected
        .iter()
        .filter_map(|id| outcome.candidates.iter().find(|c| &c.record_id == id))
        .map(|c| EvidenceRef::new(c.record_id.clone(), c.title.clone()))
        .collect()
}

/// Shared body of the two iterative tools: run the search, and fall back to
/// a plain similarity search when the outcome cannot be trusted.
struct VerifiedSearch {
    search: Arc<IterativeSearch>,
    similarity: Arc<dyn SimilaritySearch>,
    store: Arc<dyn RecordStore>,
}

impl VerifiedSearch {
    /// Each round bounds its own model and corpus calls, so the tool as a
    /// whole gets the search's worst case rather than the executor default.
    fn time_budget(&self) -> Duration {
        self.search.config().time_budget()
    }

    async fn run(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        hint: Option<&str>,
        ctx: ToolContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let outcome = self.search.run_in_context(query, mode, limit, ctx, hint).await;
        let trusted = match mode {
            SearchMode::Best => outcome.reliable,
            SearchMode::Top => !outcome.selected.is_empty(),
        };
        if trusted {
            let evidence = selected_evidence(&outcome);
            return Ok(ToolOutput::text(render_outcome(&outcome)).with_evidence(evidence));
        }

        info!(
            "Iterative search not reliable (confidence {:.2}), falling back to plain search",
            outcome.confidence
        );
        let config = self.search.config();
        let fallback = plain_search(
            self.similarity.as_ref(),
            self.store.as_ref(),
            query,
            limit.max(DEFAULT_SEARCH_LIMIT),
            config.search_timeout(),
            config.fetch_timeout(),
        )
        .await?;
        let mut text = format!(
            "No reliable match after {} round(s) (confidence {:.2}).",
            outcome.rounds_completed, outcome.confidence
        );
        if outcome.cancelled {
            text.push_str(" The search was stopped early.");
        }
        text.push_str(" Unverified similarity results follow; treat them as leads, not answers.\n");
        text.push_str(&fallback.text);
        Ok(ToolOutput::text(text).with_evidence(fallback.evidence))
    }
}

/// Iterative search for the single record that fits a description.
pub struct FindBestMatch {
    inner: VerifiedSearch,
}

impl FindBestMatch {
    pub fn new(
        search: Arc<IterativeSearch>,
        similarity: Arc<dyn SimilaritySearch>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            inner: VerifiedSearch {
                search,
                similarity,
                store,
            },
        }
    }
}

impl Tool for FindBestMatch {
    fn spec(&self) -> ToolSpec {
        ToolSpec::builder(
            "find_best_match",
            "Find the single record that best fits a description, verifying candidates over several refined searches",
        )
        .when_to_use("The user wants one specific record, or asks which record fits best")
        .when_not_to_use("You only need a rough list of candidates; use search_records")
        .parameters_for::<FindBestMatchArgs>()
        .example(
            r#"{"query": "road maintenance tender in Leon", "context": "user works in civil engineering"}"#,
            "Verified over 5 round(s) ...\n1. [T-7] Road maintenance Leon (mean score 9.0/10, seen in 3 round(s))",
        )
        .output_format(
            "The verified record with confidence and justification, or unverified similarity \
             results when no reliable match was found",
        )
        .timeout(self.inner.time_budget())
        .build()
    }

    fn execute<'a>(&'a self, arguments: serde_json::Value, ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: FindBestMatchArgs = parse_tool_args(arguments)?;
            self.inner
                .run(&args.query, SearchMode::Best, 1, args.context.as_deref(), ctx)
                .await
        })
    }
}

/// Iterative search for the K records that fit a description best.
pub struct FindTopMatches {
    inner: VerifiedSearch,
}

impl FindTopMatches {
    pub fn new(
        search: Arc<IterativeSearch>,
        similarity: Arc<dyn SimilaritySearch>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            inner: VerifiedSearch {
                search,
                similarity,
                store,
            },
        }
    }
}

impl Tool for FindTopMatches {
    fn spec(&self) -> ToolSpec {
        ToolSpec::builder(
            "find_top_matches",
            "Find the best few records for a description, verifying candidates over several refined searches",
        )
        .when_to_use("The user asks for several relevant records, ranked")
        .when_not_to_use("The user wants exactly one record; use find_best_match")
        .parameters_for::<FindTopMatchesArgs>()
        .example(
            r#"{"query": "school construction projects", "limit": 3}"#,
            "Verified over 5 round(s) ...\n1. [S-2] ...\n2. [S-9] ...\n3. [S-4] ...",
        )
        .output_format("Ranked verified records with mean scores, or unverified similarity results")
        .timeout(self.inner.time_budget())
        .build()
    }

    fn execute<'a>(&'a self, arguments: serde_json::Value, ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: FindTopMatchesArgs = parse_tool_args(arguments)?;
            let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
            if !(1..=MAX_TOP_LIMIT).contains(&limit) {
                return Err(ToolError::InvalidArguments(format!(
                    "limit must be between 1 and {MAX_TOP_LIMIT}, got {limit}"
                )));
            }
            self.inner
                .run(&args.query, SearchMode::Top, limit, args.context.as_deref(), ctx)
                .await
        })
    }
}

// ── UserContextTool ────────────────────────────────────────────────

/// The current user's profile and saved items.
pub struct UserContextTool {
    provider: Arc<dyn UserContextProvider>,
}

impl UserContextTool {
    pub fn new(provider: Arc<dyn UserContextProvider>) -> Self {
        Self { provider }
    }
}

impl Tool for UserContextTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::builder("user_context", "Read the current user's profile and saved items")
            .when_to_use("The answer depends on who the user is or what they have saved")
            .when_not_to_use("The question is fully specified without personal context")
            .parameters_for::<UserContextArgs>()
            .output_format("Profile fields followed by saved item summaries")
            .opt_in()
            .build()
    }

    fn execute<'a>(&'a self, _arguments: serde_json::Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        Box::pin(async move {
            match self.provider.user_context().await {
                Some(context) if !context.is_empty() => Ok(ToolOutput::text(context.render())),
                _ => Ok(ToolOutput::text("No user context is available.")),
            }
        })
    }
}

// ── Catalog ────────────────────────────────────────────────────────

/// The standard catalog: the four search tools, plus `user_context` when a
/// provider is given. `enabled` names opt-in tools to expose.
pub fn default_catalog(
    search: Arc<IterativeSearch>,
    similarity: Arc<dyn SimilaritySearch>,
    store: Arc<dyn RecordStore>,
    user_context: Option<Arc<dyn UserContextProvider>>,
    enabled: &[String],
) -> Result<ToolCatalog, CatalogError> {
    let config = search.config();
    let (search_timeout, fetch_timeout) = (config.search_timeout(), config.fetch_timeout());

    let mut catalog = ToolCatalog::new()
        .with(
            SearchRecords::new(similarity.clone(), store.clone())
                .with_timeouts(search_timeout, fetch_timeout),
        )?
        .with(FetchRecord::new(store.clone()).with_timeout(fetch_timeout))?
        .with(FindBestMatch::new(search.clone(), similarity.clone(), store.clone()))?
        .with(FindTopMatches::new(search, similarity, store))?;
    if let Some(provider) = user_context {
        catalog.register(UserContextTool::new(provider))?;
    }
    catalog.with_enabled(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::{EventLog, TurnEvent};
    use crate::config::SearchConfig;
    use crate::corpus::UserContext;
    use crate::ToolCall;
    use crate::test_support::{ScriptedModel, StaticCorpus, verification_reply};
    use crate::tools::executor::{ToolExecutor, ToolInvocation};
    use serde_json::json;

    fn corpus() -> Arc<StaticCorpus> {
        Arc::new(
            StaticCorpus::new()
                .with_hits(vec![
                    SearchHit::new("A", 0.9),
                    SearchHit::new("A", 0.7),
                    SearchHit::new("B", 0.6),
                ])
                .with_record("A", "Alpha")
                .with_record("B", "Beta"),
        )
    }

    fn search(model: ScriptedModel, corpus: Arc<StaticCorpus>) -> Arc<IterativeSearch> {
        Arc::new(IterativeSearch::new(
            Arc::new(model),
            corpus.clone(),
            corpus,
            SearchConfig::default(),
        ))
    }

    #[tokio::test]
    async fn search_records_dedups_and_collects_evidence() {
        let c = corpus();
        let tool = SearchRecords::new(c.clone(), c);
        let out = tool
            .execute(json!({"query": "x"}), ToolContext::detached())
            .await
            .unwrap();
        assert!(out.text.starts_with("2 record(s)"));
        assert!(out.text.contains("1. [A] Alpha (score 0.90)"));
        assert_eq!(
            out.evidence,
            vec![EvidenceRef::new("A", "Alpha"), EvidenceRef::new("B", "Beta")]
        );
    }

    #[tokio::test]
    async fn fetch_record_missing_is_an_error() {
        let tool = FetchRecord::new(corpus());
        let err = tool
            .execute(json!({"record_id": "does_not_exist"}), ToolContext::detached())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Failed("record 'does_not_exist' not found".into()));

        let out = tool
            .execute(json!({"record_id": "B"}), ToolContext::detached())
            .await
            .unwrap();
        assert!(out.text.starts_with("[B] Beta"));
        assert_eq!(out.evidence, vec![EvidenceRef::new("B", "Beta")]);
    }

    #[tokio::test]
    async fn best_match_reports_verified_winner() {
        let c = corpus();
        let model = ScriptedModel::new().with_verifier(|_| verification_reply(9, true));
        let tool = FindBestMatch::new(search(model, c.clone()), c.clone(), c);
        let log = EventLog::new();
        let ctx = ToolContext::new(&log, None);
        let out = tool
            .execute(json!({"query": "alpha things"}), ctx)
            .await
            .unwrap();
        assert!(out.text.contains("1. [A] Alpha"));
        assert_eq!(out.evidence, vec![EvidenceRef::new("A", "Alpha")]);
        assert!(
            log.snapshot()
                .iter()
                .any(|e| matches!(e.event, TurnEvent::SearchResolved { .. }))
        );
    }

    #[tokio::test]
    async fn best_match_falls_back_when_unreliable() {
        let c = corpus();
        let model = ScriptedModel::new().with_verifier(|_| verification_reply(2, false));
        let tool = FindBestMatch::new(search(model, c.clone()), c.clone(), c);
        let out = tool
            .execute(json!({"query": "nothing fits"}), ToolContext::detached())
            .await
            .unwrap();
        assert!(out.text.starts_with("No reliable match"));
        assert!(out.text.contains("Unverified similarity results"));
        assert_eq!(out.evidence.len(), 2);
    }

    #[tokio::test]
    async fn slow_verification_outlives_the_default_tool_timeout() {
        let c = corpus();
        // Nine model calls at 100ms each against a 250ms executor default.
        let model = ScriptedModel::new()
            .with_latency(Duration::from_millis(100))
            .with_verifier(|_| verification_reply(2, false));
        let catalog = default_catalog(search(model, c.clone()), c.clone(), c, None, &[]).unwrap();
        assert_eq!(
            catalog.spec("find_best_match").unwrap().timeout,
            Some(SearchConfig::default().time_budget())
        );

        let mut exec = ToolExecutor::new(&catalog, Duration::from_millis(250));
        let call = ToolCall::new("c1", "find_best_match", r#"{"query": "alpha"}"#);
        let result = exec.execute(ToolInvocation::from_call(&call, 1, 0)).await;
        assert!(result.success(), "{:?}", result.outcome);
        let out = result.output().unwrap();
        assert!(out.text.starts_with("No reliable match after 5 round(s)"));
        assert_eq!(out.evidence.len(), 2);
    }

    #[tokio::test]
    async fn top_matches_rejects_out_of_range_limit() {
        let c = corpus();
        let tool = FindTopMatches::new(search(ScriptedModel::new(), c.clone()), c.clone(), c);
        let err = tool
            .execute(json!({"query": "x", "limit": 11}), ToolContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn user_context_is_opt_in() {
        let c = Arc::new(StaticCorpus::new().with_user_context(UserContext {
            profile: [("sector".to_string(), "construction".to_string())].into(),
            saved_items: vec!["T-1 bridge".into()],
        }));
        let s = search(ScriptedModel::new(), c.clone());

        let catalog = default_catalog(s.clone(), c.clone(), c.clone(), Some(c.clone()), &[]).unwrap();
        assert_eq!(
            catalog.active_names(),
            vec!["search_records", "fetch_record", "find_best_match", "find_top_matches"]
        );
        assert!(catalog.resolve("user_context").is_err());

        let catalog =
            default_catalog(s, c.clone(), c.clone(), Some(c), &["user_context".into()]).unwrap();
        let out = catalog
            .resolve("user_context")
            .unwrap()
            .execute(json!({}), ToolContext::detached())
            .await
            .unwrap();
        assert!(out.text.contains("construction"));
    }
}
