//! Corpus capabilities supplied by the host application.
//!
//! The core never talks to a database or vector index directly. It consumes
//! three narrow capabilities:
//!
//! - [`SimilaritySearch`]: ranked chunk hits for a free-text query.
//! - [`RecordStore`]: the full structured record behind an id.
//! - [`UserContextProvider`]: optional profile and saved-item summary.
//!
//! [`MemoryCorpus`] implements all three over an in-memory record list. It
//! ranks paragraph chunks with `nucleo-matcher`, one case- and
//! accent-insensitive atom per query term, which is enough to make evidence
//! density meaningful for the CLI and for tests.

use crate::error::CorpusError;
use futures::future::BoxFuture;
use nucleo_matcher::pattern::{Atom, AtomKind, CaseMatching, Normalization};
use nucleo_matcher::{Config, Matcher, Utf32String};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// ── Data types ─────────────────────────────────────────────────────

/// One similarity hit. Several hits may point at the same record when
/// multiple chunks of it match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record_id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
}

impl SearchHit {
    pub fn new(record_id: impl Into<String>, score: f32) -> Self {
        Self {
            record_id: record_id.into(),
            score,
            chunk: None,
        }
    }
}

/// A full structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fields: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Render the record as plain text for a prompt, capped at `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = format!("[{}] {}\n", self.id, self.title);
        for (k, v) in &self.fields {
            out.push_str(&format!("{k}: {v}\n"));
        }
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
        }
        if out.chars().count() > max_chars {
            let cut: String = out.chars().take(max_chars).collect();
            format!("{cut}\n[record truncated]")
        } else {
            out
        }
    }
}

/// Profile data and saved items for the current user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
    #[serde(default)]
    pub saved_items: Vec<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.profile.is_empty() && self.saved_items.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.profile.is_empty() {
            out.push_str("Profile:\n");
            for (k, v) in &self.profile {
                out.push_str(&format!("- {k}: {v}\n"));
            }
        }
        if !self.saved_items.is_empty() {
            out.push_str("Saved items:\n");
            for item in &self.saved_items {
                out.push_str(&format!("- {item}\n"));
            }
        }
        out
    }
}

// ── Capabilities ───────────────────────────────────────────────────

pub trait SimilaritySearch: Send + Sync {
    /// Up to `top_k` hits, best first.
    fn search<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
    ) -> BoxFuture<'a, Result<Vec<SearchHit>, CorpusError>>;
}

pub trait RecordStore: Send + Sync {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, Result<Record, CorpusError>>;
}

pub trait UserContextProvider: Send + Sync {
    fn user_context(&self) -> BoxFuture<'_, Option<UserContext>>;
}

/// [`SimilaritySearch::search`] with a hard timeout.
pub async fn search_with_timeout(
    search: &dyn SimilaritySearch,
    query: &str,
    top_k: usize,
    timeout: Duration,
) -> Result<Vec<SearchHit>, CorpusError> {
    tokio::time::timeout(timeout, search.search(query, top_k))
        .await
        .unwrap_or(Err(CorpusError::Timeout(timeout)))
}

/// [`RecordStore::fetch`] with a hard timeout.
pub async fn fetch_with_timeout(
    store: &dyn RecordStore,
    record_id: &str,
    timeout: Duration,
) -> Result<Record, CorpusError> {
    tokio::time::timeout(timeout, store.fetch(record_id))
        .await
        .unwrap_or(Err(CorpusError::Timeout(timeout)))
}

// ── MemoryCorpus ───────────────────────────────────────────────────

struct Chunk {
    record: usize,
    text: String,
    haystack: Utf32String,
}

/// In-memory corpus with paragraph-level term matching.
pub struct MemoryCorpus {
    records: Vec<Record>,
    chunks: Vec<Chunk>,
    user_context: Option<UserContext>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    List(Vec<Record>),
    Wrapped {
        records: Vec<Record>,
        #[serde(default)]
        user_context: Option<UserContext>,
    },
}

impl MemoryCorpus {
    pub fn new(records: Vec<Record>) -> Self {
        let chunks = records
            .iter()
            .enumerate()
            .flat_map(|(i, r)| chunk_record(r).into_iter().map(move |text| (i, text)))
            .map(|(record, text)| Chunk {
                record,
                haystack: Utf32String::from(text.as_str()),
                text,
            })
            .collect();
        Self {
            records,
            chunks,
            user_context: None,
        }
    }

    pub fn with_user_context(mut self, context: UserContext) -> Self {
        self.user_context = Some(context);
        self
    }

    /// Parse either a JSON array of records or
    /// `{"records": [...], "user_context": {...}}`.
    pub fn from_json_str(json: &str) -> Result<Self, CorpusError> {
        let file: RecordFile = serde_json::from_str(json)
            .map_err(|e| CorpusError::Backend(format!("invalid record file: {e}")))?;
        Ok(match file {
            RecordFile::List(records) => Self::new(records),
            RecordFile::Wrapped {
                records,
                user_context,
            } => {
                let corpus = Self::new(records);
                match user_context {
                    Some(ctx) => corpus.with_user_context(ctx),
                    None => corpus,
                }
            }
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CorpusError::Backend(format!("failed to read {}: {e}", path.display())))?;
        let corpus = Self::from_json_str(&json)?;
        debug!(
            "Loaded {} records ({} chunks) from {}",
            corpus.records.len(),
            corpus.chunks.len(),
            path.display()
        );
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_user_context(&self) -> bool {
        self.user_context.is_some()
    }

    /// Chunks scored by the sum of their matching term atoms, normalized so
    /// the best chunk scores 1.0.
    fn rank(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let atoms = query_atoms(query);
        if atoms.is_empty() {
            return Vec::new();
        }
        let mut matcher = Matcher::new(Config::DEFAULT);
        let mut scored: Vec<(u32, &Chunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let score: u32 = atoms
                    .iter()
                    .filter_map(|atom| atom.score(chunk.haystack.slice(..), &mut matcher))
                    .map(u32::from)
                    .sum();
                (score > 0).then_some((score, chunk))
            })
            .collect();
        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(top_k);

        let best = scored.first().map_or(1.0, |(score, _)| *score as f32);
        scored
            .into_iter()
            .map(|(score, chunk)| SearchHit {
                record_id: self.records[chunk.record].id.clone(),
                score: score as f32 / best,
                chunk: Some(chunk.text.chars().take(200).collect()),
            })
            .collect()
    }
}

impl SimilaritySearch for MemoryCorpus {
    fn search<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
    ) -> BoxFuture<'a, Result<Vec<SearchHit>, CorpusError>> {
        Box::pin(async move { Ok(self.rank(query, top_k)) })
    }
}

impl RecordStore for MemoryCorpus {
    fn fetch<'a>(&'a self, record_id: &'a str) -> BoxFuture<'a, Result<Record, CorpusError>> {
        Box::pin(async move {
            self.records
                .iter()
                .find(|r| r.id == record_id)
                .cloned()
                .ok_or_else(|| CorpusError::NotFound(record_id.to_string()))
        })
    }
}

impl UserContextProvider for MemoryCorpus {
    fn user_context(&self) -> BoxFuture<'_, Option<UserContext>> {
        Box::pin(async move { self.user_context.clone() })
    }
}

/// Title plus fields form the first chunk; each blank-line separated
/// paragraph of the body is its own chunk.
fn chunk_record(record: &Record) -> Vec<String> {
    let mut head = record.title.clone();
    for (k, v) in &record.fields {
        head.push_str(&format!("\n{k}: {v}"));
    }
    let mut chunks = vec![head];
    chunks.extend(
        record
            .body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from),
    );
    chunks
}

/// One substring atom per distinct query term of three or more characters.
fn query_atoms(query: &str) -> Vec<Atom> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
    {
        let term = term.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
        .iter()
        .map(|t| {
            Atom::new(
                t,
                CaseMatching::Ignore,
                Normalization::Smart,
                AtomKind::Substring,
                false,
            )
        })
        .collect()
}
