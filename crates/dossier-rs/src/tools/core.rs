//! Tool abstraction and the tool catalog.
//!
//! The [`Tool`] trait pairs a static [`ToolSpec`] with an async `execute`
//! method. Tools are registered into a [`ToolCatalog`], which owns the specs,
//! enforces unique names, hides opt-in tools until they are enabled, and
//! resolves names at dispatch time. Execution itself (validation, timeouts,
//! sequencing, the audit transcript) lives in
//! [`ToolExecutor`](super::executor::ToolExecutor).

use super::spec::{Capability, ToolSpec};
use crate::ToolDef;
use crate::agent::events::{EventHandler, NoopHandler};
use crate::error::{CatalogError, ToolError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) of tool output sent back to the model.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

// ── Tool output ────────────────────────────────────────────────────

/// A record a tool retrieved or relied on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub record_id: String,
    pub title: String,
}

impl EvidenceRef {
    pub fn new(record_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            title: title.into(),
        }
    }
}

/// Successful tool output: text for the model plus the records it touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    pub evidence: Vec<EvidenceRef>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = EvidenceRef>) -> Self {
        self.evidence.extend(evidence);
        self
    }
}

// ── Tool context ───────────────────────────────────────────────────

/// Predicate polled between units of work; `true` means stop early.
pub type StopSignal<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Per-turn handles a tool may use while it runs: the turn's event handler
/// and its stop signal. Tools that spawn nested work (the iterative search
/// tools) forward both.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub events: &'a dyn EventHandler,
    pub stop_signal: Option<StopSignal<'a>>,
}

impl<'a> ToolContext<'a> {
    pub fn new(events: &'a dyn EventHandler, stop_signal: Option<StopSignal<'a>>) -> Self {
        Self {
            events,
            stop_signal,
        }
    }

    /// No events, never cancelled.
    pub fn detached() -> ToolContext<'static> {
        ToolContext {
            events: &NoopHandler,
            stop_signal: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_signal.is_some_and(|stop| stop())
    }
}

impl fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("has_stop_signal", &self.stop_signal.is_some())
            .finish()
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the agent can invoke via function-calling.
///
/// `execute` receives arguments that have already been parsed and checked
/// against [`ToolSpec::parameters`]. Tools must not mutate the domain store:
/// the agent loop may run several of them concurrently within one iteration.
///
/// # Example
///
/// ```ignore
/// struct FetchRecord { store: Arc<dyn RecordStore> }
///
/// impl Tool for FetchRecord {
///     fn spec(&self) -> ToolSpec {
///         ToolSpec::builder("fetch_record", "Fetch one record by id")
///             .parameters_for::<FetchArgs>()
///             .build()
///     }
///
///     fn execute<'a>(&'a self, arguments: serde_json::Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
///         Box::pin(async move {
///             let args: FetchArgs = parse_tool_args(arguments)?;
///             let record = self.store.fetch(&args.record_id).await?;
///             Ok(ToolOutput::text(record.render(4_000)))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    fn execute<'a>(&'a self, arguments: serde_json::Value, ctx: ToolContext<'a>) -> ToolFuture<'a>;
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based tool that deserializes its arguments into `A`. The
/// [`ToolContext`] is not passed to the closure.
///
/// Use it for stateless tools; anything holding shared handles (a corpus, a
/// search controller) reads better as a struct implementing [`Tool`].
pub struct FnTool {
    spec: ToolSpec,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let erased = move |raw: serde_json::Value| -> Pin<
            Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>,
        > {
            match parse_tool_args::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };
        Self {
            spec,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    fn execute<'a>(&'a self, arguments: serde_json::Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
        (self.handler)(arguments)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.spec.name)
            .finish()
    }
}

// ── ToolCatalog ────────────────────────────────────────────────────

struct CatalogEntry {
    spec: ToolSpec,
    tool: Box<dyn Tool>,
}

/// Registry of tools keyed by unique name.
///
/// Built once at startup and then shared read-only across concurrent turns.
/// Opt-in tools are registered but invisible (absent from
/// [`definitions`](Self::definitions), unresolvable) until enabled.
///
/// ```ignore
/// let catalog = ToolCatalog::new()
///     .with(SearchRecords::new(search.clone(), store.clone()))?
///     .with(UserContextTool::new(provider))?
///     .with_enabled(&["user_context".into()])?;
/// ```
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    enabled: HashSet<String>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.entries.iter().map(|e| &e.spec.name).collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            enabled: HashSet::new(),
        }
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), CatalogError> {
        let spec = tool.spec();
        if self.index.contains_key(&spec.name) {
            return Err(CatalogError::DuplicateTool(spec.name));
        }
        debug!("Registered tool {} ({:?})", spec.name, spec.capability);
        self.index.insert(spec.name.clone(), self.entries.len());
        self.entries.push(CatalogEntry {
            spec,
            tool: Box::new(tool),
        });
        Ok(())
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Result<Self, CatalogError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Expose an opt-in tool. Enabling an always-on tool is a no-op.
    pub fn enable(&mut self, name: &str) -> Result<(), CatalogError> {
        if !self.index.contains_key(name) {
            return Err(CatalogError::UnknownTool(name.to_string()));
        }
        self.enabled.insert(name.to_string());
        Ok(())
    }

    pub fn with_enabled(mut self, names: &[String]) -> Result<Self, CatalogError> {
        for name in names {
            self.enable(name)?;
        }
        Ok(self)
    }

    fn is_visible(&self, entry: &CatalogEntry) -> bool {
        match entry.spec.capability {
            Capability::AlwaysOn => true,
            Capability::OptIn => self.enabled.contains(&entry.spec.name),
        }
    }

    /// Look up an exposed tool by name.
    pub fn resolve(&self, name: &str) -> Result<&dyn Tool, CatalogError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .filter(|e| self.is_visible(e))
            .map(|e| e.tool.as_ref())
            .ok_or_else(|| CatalogError::UnknownTool(name.to_string()))
    }

    /// Spec of an exposed tool.
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .filter(|e| self.is_visible(e))
            .map(|e| &e.spec)
    }

    /// Definitions of all exposed tools, in registration order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.entries
            .iter()
            .filter(|e| self.is_visible(e))
            .map(|e| e.spec.to_tool_def())
            .collect()
    }

    /// Names of all exposed tools, in registration order.
    pub fn active_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| self.is_visible(e))
            .map(|e| e.spec.name.clone())
            .collect()
    }

    /// Number of registered tools, exposed or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Deserialize validated arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    arguments: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.len() > args_preview.len() { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes (on a char boundary), appending
/// a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = s.get(..cut).unwrap_or_default();
    format!("{head}...\n[truncated: {} bytes total]", s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolSpec::builder("echo", "Echo the input")
                .parameters_for::<EchoArgs>()
                .build(),
            |args: EchoArgs| async move { Ok(ToolOutput::text(args.text)) },
        )
    }

    fn opt_in_tool() -> FnTool {
        FnTool::new(
            ToolSpec::builder("profile", "Read the profile").opt_in().build(),
            |_: serde_json::Value| async move { Ok(ToolOutput::text("profile")) },
        )
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo_tool()).unwrap();
        let err = catalog.register(echo_tool()).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTool("echo".into()));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn resolve_unknown_fails() {
        let catalog = ToolCatalog::new().with(echo_tool()).unwrap();
        assert!(catalog.resolve("echo").is_ok());
        assert_eq!(
            catalog.resolve("does_not_exist").err(),
            Some(CatalogError::UnknownTool("does_not_exist".into()))
        );
    }

    #[test]
    fn opt_in_tools_hidden_until_enabled() {
        let catalog = ToolCatalog::new()
            .with(echo_tool())
            .unwrap()
            .with(opt_in_tool())
            .unwrap();
        assert_eq!(catalog.active_names(), vec!["echo".to_string()]);
        assert!(catalog.resolve("profile").is_err());
        assert!(catalog.spec("profile").is_none());

        let catalog = catalog.with_enabled(&["profile".into()]).unwrap();
        assert_eq!(catalog.definitions().len(), 2);
        assert!(catalog.resolve("profile").is_ok());
    }

    #[test]
    fn enabling_unregistered_tool_fails() {
        let mut catalog = ToolCatalog::new();
        assert_eq!(
            catalog.enable("ghost"),
            Err(CatalogError::UnknownTool("ghost".into()))
        );
    }

    #[tokio::test]
    async fn fn_tool_parses_arguments() {
        let tool = echo_tool();
        let out = tool
            .execute(serde_json::json!({"text": "hi"}), ToolContext::detached())
            .await.unwrap();
        assert_eq!(out.text, "hi");

        let err = tool
            .execute(serde_json::json!({"nope": 1}), ToolContext::detached())
            .await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn detached_context_never_cancels() {
        let ctx = ToolContext::detached();
        assert!(!ctx.is_cancelled());
        let stop = || true;
        assert!(ToolContext::new(&NoopHandler, Some(&stop as StopSignal<'_>)).is_cancelled());
    }

    #[test]
    fn truncate_short_unchanged() {
        assert_eq!(truncate_result("hello".into(), 100), "hello");
    }

    #[test]
    fn truncate_long_is_cut() {
        let result = truncate_result("a".repeat(200), 50);
        assert!(result.starts_with(&"a".repeat(50)));
        assert!(result.contains("[truncated: 200 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let result = truncate_result("é".repeat(10), 5);
        assert!(result.starts_with("éé..."));
    }

    #[test]
    fn tool_output_builder() {
        let out = ToolOutput::text("x").with_evidence([EvidenceRef::new("A", "Alpha")]);
        assert_eq!(out.evidence.len(), 1);
        assert_eq!(out.evidence[0].record_id, "A");
    }
}
