//! Deterministic doubles for the host capabilities, for unit and
//! integration tests.
//!
//! [`ScriptedModel`] answers each request according to its purpose, which it
//! recognises from the system prompt: query refinement, content
//! verification, response review, or (anything else) an agent decision.
//! [`StaticCorpus`] returns fixed hits and records with failure injection.

use crate::api::model::{LanguageModel, ModelFuture};
use crate::corpus::{
    Record, RecordStore, SearchHit, SimilaritySearch, UserContext, UserContextProvider,
};
use crate::error::{CorpusError, ProviderError};
use crate::review::REVIEWER_SYSTEM_PROMPT;
use crate::search::refiner::REFINER_SYSTEM_PROMPT;
use crate::search::verifier::VERIFIER_SYSTEM_PROMPT;
use crate::{ChatCompletion, ChatRequest, ToolCall};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ── ScriptedModel ──────────────────────────────────────────────────

/// What a model request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Agent,
    Refine,
    Verify,
    Review,
}

impl Purpose {
    pub fn of(request: &ChatRequest) -> Self {
        match request.system_prompt() {
            Some(p) if p == REFINER_SYSTEM_PROMPT => Purpose::Refine,
            Some(p) if p == VERIFIER_SYSTEM_PROMPT => Purpose::Verify,
            Some(p) if p == REVIEWER_SYSTEM_PROMPT => Purpose::Review,
            _ => Purpose::Agent,
        }
    }
}

type Responder = Box<dyn Fn(&ChatRequest) -> Result<ChatCompletion, ProviderError> + Send + Sync>;

/// A [`LanguageModel`] that replays scripted replies.
///
/// Agent decisions come from a queue first, then from the agent closure.
/// Unscripted purposes fail with [`ProviderError::Malformed`], which
/// exercises the refiner and reviewer fallbacks.
///
/// ```
/// use dossier_rs::ChatCompletion;
/// use dossier_rs::test_support::{ScriptedModel, tool_call};
///
/// let model = ScriptedModel::new()
///     .with_agent_replies([tool_call("c1", "fetch_record", r#"{"record_id": "A"}"#)])
///     .with_agent_replies([ChatCompletion::text("A is the answer.")]);
/// ```
#[derive(Default)]
pub struct ScriptedModel {
    agent_queue: Mutex<VecDeque<Result<ChatCompletion, ProviderError>>>,
    agent: Option<Responder>,
    refiner: Option<Responder>,
    verifier: Option<Responder>,
    reviewer: Option<Responder>,
    latency: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue agent decisions, replayed in order.
    pub fn with_agent_replies(self, replies: impl IntoIterator<Item = ChatCompletion>) -> Self {
        self.lock_queue().extend(replies.into_iter().map(Ok));
        self
    }

    /// Queue a failing agent decision.
    pub fn with_agent_error(self, error: ProviderError) -> Self {
        self.lock_queue().push_back(Err(error));
        self
    }

    /// Answer agent decisions once the queue is empty.
    pub fn with_agent_fn(
        mut self,
        f: impl Fn(&ChatRequest) -> ChatCompletion + Send + Sync + 'static,
    ) -> Self {
        self.agent = Some(Box::new(move |r| Ok(f(r))));
        self
    }

    pub fn with_refiner(
        mut self,
        f: impl Fn(&ChatRequest) -> ChatCompletion + Send + Sync + 'static,
    ) -> Self {
        self.refiner = Some(Box::new(move |r| Ok(f(r))));
        self
    }

    pub fn with_verifier(
        mut self,
        f: impl Fn(&ChatRequest) -> ChatCompletion + Send + Sync + 'static,
    ) -> Self {
        self.verifier = Some(Box::new(move |r| Ok(f(r))));
        self
    }

    pub fn with_reviewer(
        mut self,
        f: impl Fn(&ChatRequest) -> ChatCompletion + Send + Sync + 'static,
    ) -> Self {
        self.reviewer = Some(Box::new(move |r| Ok(f(r))));
        self
    }

    /// Sleep this long before answering each request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn requests_for(&self, purpose: Purpose) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| Purpose::of(r) == purpose)
            .collect()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ChatCompletion, ProviderError>>> {
        self.agent_queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn respond(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let purpose = Purpose::of(request);
        let responder = match purpose {
            Purpose::Agent => {
                if let Some(queued) = self.lock_queue().pop_front() {
                    return queued;
                }
                &self.agent
            }
            Purpose::Refine => &self.refiner,
            Purpose::Verify => &self.verifier,
            Purpose::Review => &self.reviewer,
        };
        match responder {
            Some(f) => f(request),
            None => Err(ProviderError::Malformed(format!(
                "no scripted reply for {purpose:?} request"
            ))),
        }
    }
}

impl LanguageModel for ScriptedModel {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.respond(request)
        })
    }
}

/// An agent decision requesting one tool call.
pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatCompletion {
    ChatCompletion::tool_calls(vec![ToolCall::new(id, name, arguments)])
}

/// A verifier reply.
pub fn verification_reply(score: u8, corresponds: bool) -> ChatCompletion {
    let missing: Vec<&str> = if corresponds { vec![] } else { vec!["topic"] };
    ChatCompletion::text(
        serde_json::json!({
            "score": score,
            "corresponds": corresponds,
            "reasoning": format!("scripted score {score}"),
            "matched_aspects": [],
            "missing_aspects": missing,
        })
        .to_string(),
    )
}

/// A reviewer reply with the given rubric scores.
pub fn review_reply(format: f64, completeness: f64, justification: f64) -> ChatCompletion {
    ChatCompletion::text(
        serde_json::json!({
            "format": format,
            "completeness": completeness,
            "justification": justification,
            "issues": ["cite the records used"],
            "suggestions": ["add the budget of each tender"],
            "feedback": "mostly fine",
        })
        .to_string(),
    )
}

// ── StaticCorpus ───────────────────────────────────────────────────

/// Fixed search hits and records with failure injection.
#[derive(Default)]
pub struct StaticCorpus {
    default_hits: Vec<SearchHit>,
    query_hits: HashMap<String, Vec<SearchHit>>,
    records: HashMap<String, Record>,
    search_error: Option<String>,
    failing_fetches: HashSet<String>,
    fail_all_fetches: bool,
    user_context: Option<UserContext>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl StaticCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hits for any query without specific hits.
    pub fn with_hits(mut self, hits: Vec<SearchHit>) -> Self {
        self.default_hits = hits;
        self
    }

    /// Hits for one exact query.
    pub fn with_query_hits(mut self, query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        self.query_hits.insert(query.into(), hits);
        self
    }

    pub fn with_record(self, id: &str, title: &str) -> Self {
        self.with_full_record(Record::new(id, title).with_body(format!("Full text of {title}.")))
    }

    pub fn with_full_record(mut self, record: Record) -> Self {
        self.records.insert(record.id.clone(), record);
        self
    }

    pub fn with_user_context(mut self, context: UserContext) -> Self {
        self.user_context = Some(context);
        self
    }

    /// Every search fails with `message`.
    pub fn failing_search(mut self, message: impl Into<String>) -> Self {
        self.search_error = Some(message.into());
        self
    }

    /// Fetches of `id` fail.
    pub fn failing_fetch(mut self, id: impl Into<String>) -> Self {
        self.failing_fetches.insert(id.into());
        self
    }

    /// Every fetch fails.
    pub fn failing_all_fetches(mut self) -> Self {
        self.fail_all_fetches = true;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl SimilaritySearch for StaticCorpus {
    fn search<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
    ) -> BoxFuture<'a, Result<Vec<SearchHit>, CorpusError>> {
        Box::pin(async move {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.search_error {
                return Err(CorpusError::Backend(message.clone()));
            }
            let hits = self.query_hits.get(query).unwrap_or(&self.default_hits);
            Ok(hits.iter().take(top_k).cloned().collect())
        })
    }
}

impl RecordStore for StaticCorpus {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, Result<Record, CorpusError>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_all_fetches || self.failing_fetches.contains(record_id) {
                return Err(CorpusError::Backend(format!("fetch of {record_id} failed")));
            }
            self.records
                .get(record_id)
                .cloned()
                .ok_or_else(|| CorpusError::NotFound(record_id.to_string()))
        })
    }
}

impl UserContextProvider for StaticCorpus {
    fn user_context(&self) -> BoxFuture<'_, Option<UserContext>> {
        Box::pin(async move { self.user_context.clone() })
    }
}
