//! Answer questions over a record corpus with a tool-calling agent.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # One reviewed-and-improved turn
//! dossier ask --records tenders.json "Which tender covers bridge inspections in Leon?"
//!
//! # Continue a conversation, exposing the opt-in user_context tool
//! dossier ask --records tenders.json --history chat.json --enable-tool user_context \
//!   "And which of those closes first?"
//!
//! # Run the iterative search directly
//! dossier search --records tenders.json --mode top --limit 3 "school construction"
//!
//! # Record the event stream as JSON lines
//! dossier ask --records tenders.json --events events.jsonl "..."
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use dossier_rs::prelude::*;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Answer questions over a record corpus with a tool-calling agent.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "dossier", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question: draft, review, improve
    Ask(AskArgs),
    /// Run the iterative search-and-verify controller
    Search(SearchArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// JSON file with the records to search (array, or {"records": [...], "user_context": {...}})
    #[arg(long)]
    records: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model used by every stage (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// Write every event as a JSON line to this file
    #[arg(long)]
    events: Option<PathBuf>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AskArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// The question
    query: String,

    /// JSON file with prior turns: [{"user": "...", "assistant": "..."}]
    #[arg(long)]
    history: Option<PathBuf>,

    /// Iteration cap per agent pass
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Expose an opt-in tool by name
    #[arg(long = "enable-tool")]
    enable_tools: Vec<String>,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// What to look for
    query: String,

    #[arg(long, value_enum, default_value_t = ModeArg::Best)]
    mode: ModeArg,

    /// Records to return in top mode (1-10)
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Best,
    Top,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Best => SearchMode::Best,
            ModeArg::Top => SearchMode::Top,
        }
    }
}

// ── Setup ──────────────────────────────────────────────────────────

struct Runtime {
    config: DossierConfig,
    model: Arc<OpenRouterClient>,
    corpus: Arc<MemoryCorpus>,
    log: Arc<EventLog>,
    stop: Arc<AtomicBool>,
}

fn load_config(path: Option<&Path>) -> Result<DossierConfig, String> {
    match path {
        Some(p) => DossierConfig::load(p).map_err(|e| e.to_string()),
        None => Ok(DossierConfig::default()),
    }
}

fn setup(common: &CommonArgs, mut config: DossierConfig) -> Result<Runtime, String> {
    if let Some(model) = &common.model {
        config = config.with_model(model.clone());
    }
    config.validate().map_err(|e| e.to_string())?;

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let model = Arc::new(OpenRouterClient::new(api_key).map_err(|e| e.to_string())?);

    let corpus = MemoryCorpus::load(&common.records)
        .map_err(|e| format!("failed to load {}: {e}", common.records.display()))?;
    info!("Loaded {} record(s) from {}", corpus.len(), common.records.display());

    // Ctrl-C stops the run at the next iteration or search round.
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current step");
            flag.store(true, Ordering::SeqCst);
        }
    });

    Ok(Runtime {
        config,
        model,
        corpus: Arc::new(corpus),
        log: Arc::new(EventLog::new()),
        stop,
    })
}

impl Runtime {
    fn handler(&self) -> Arc<CompositeEventHandler> {
        Arc::new(
            CompositeEventHandler::new()
                .with(LoggingHandler)
                .with(self.log.clone()),
        )
    }

    fn iterative_search(&self, handler: Arc<CompositeEventHandler>) -> IterativeSearch {
        let stop = self.stop.clone();
        let search = IterativeSearch::new(
            self.model.clone(),
            self.corpus.clone(),
            self.corpus.clone(),
            self.config.search.clone(),
        )
        .with_event_handler(handler)
        .with_stop_signal(move || stop.load(Ordering::SeqCst));
        if self.corpus.has_user_context() {
            search.with_user_context(self.corpus.clone())
        } else {
            search
        }
    }

    fn write_events(&self, path: Option<&Path>) -> Result<(), String> {
        let Some(path) = path else {
            return Ok(());
        };
        let mut lines = self.log.to_json_lines();
        lines.push('\n');
        std::fs::write(path, lines)
            .map_err(|e| format!("failed to write events to {}: {e}", path.display()))?;
        info!("Wrote {} event(s) to {}", self.log.len(), path.display());
        Ok(())
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

// ── Commands ───────────────────────────────────────────────────────

async fn ask(args: AskArgs) -> Result<String, String> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(n) = args.max_iterations {
        config.agent.max_iterations = n;
    }
    config.enabled_tools.extend(args.enable_tools.iter().cloned());
    let rt = setup(&args.common, config)?;

    let history: Vec<ConversationTurn> = match &args.history {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            serde_json::from_str(&raw)
                .map_err(|e| format!("failed to parse {}: {e}", path.display()))?
        }
        None => Vec::new(),
    };

    let handler = rt.handler();
    let search = Arc::new(rt.iterative_search(handler.clone()));
    let user_context: Option<Arc<dyn UserContextProvider>> = if rt.corpus.has_user_context() {
        Some(rt.corpus.clone())
    } else {
        None
    };
    let catalog = default_catalog(
        search,
        rt.corpus.clone(),
        rt.corpus.clone(),
        user_context,
        &rt.config.enabled_tools,
    )
    .map_err(|e| e.to_string())?;
    info!("Tools: {}", catalog.active_names().join(", "));

    let stop = rt.stop.clone();
    let mut runner = TurnRunner::new(
        rt.model.as_ref(),
        &catalog,
        rt.config.agent.clone(),
        rt.config.review.clone(),
    )
    .with_event_handler(handler.as_ref())
    .with_stop_signal(move || stop.load(Ordering::SeqCst));
    if rt.corpus.has_user_context() {
        runner = runner.with_user_context(rt.corpus.as_ref());
    }

    let result = runner.run_agent_turn(&args.query, &history).await;
    rt.write_events(args.common.events.as_deref())?;

    let outcome = result.map_err(|e| e.to_string())?;
    if args.common.json {
        return to_json(&outcome);
    }
    let mut out = format!("{}\n", outcome.partial_answer());
    if !outcome.evidence.is_empty() {
        out.push_str("\nRecords:\n");
        for e in &outcome.evidence {
            out.push_str(&format!("  [{}] {}\n", e.record_id, e.title));
        }
    }
    if outcome.truncated {
        out.push_str("\n(answer written after the tool budget ran out)\n");
    }
    if outcome.cancelled {
        out.push_str("\n(interrupted; the answer may be the unreviewed draft)\n");
    }
    Ok(out)
}

async fn search(args: SearchArgs) -> Result<String, String> {
    let config = load_config(args.common.config.as_deref())?;
    let rt = setup(&args.common, config)?;

    let outcome = rt
        .iterative_search(rt.handler())
        .run_iterative_search(&args.query, args.mode.into(), args.limit)
        .await;
    rt.write_events(args.common.events.as_deref())?;

    if args.common.json {
        return to_json(&outcome);
    }
    let mut out = format!(
        "{} match(es), confidence {:.2} ({}), {} round(s)\n",
        outcome.selected.len(),
        outcome.confidence,
        if outcome.reliable { "reliable" } else { "not reliable" },
        outcome.rounds_completed
    );
    for (rank, id) in outcome.selected.iter().enumerate() {
        let title = outcome
            .candidates
            .iter()
            .find(|c| &c.record_id == id)
            .map(|c| c.title.as_str())
            .unwrap_or_default();
        out.push_str(&format!("{}. [{id}] {title}\n", rank + 1));
    }
    if !outcome.justification.is_empty() {
        out.push_str(&format!("\n{}\n", outcome.justification));
    }
    Ok(out)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Ask(args) => ask(args).await,
        Command::Search(args) => search(args).await,
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
