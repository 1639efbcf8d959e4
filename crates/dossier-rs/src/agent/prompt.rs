//! System prompt assembly for agent passes.
//!
//! [`SystemPromptBuilder`] joins a preamble and `## Section` blocks, skipping
//! empty ones. [`agent_system_prompt`] builds the default agent prompt from
//! the active tool catalog.

use crate::tools::core::ToolCatalog;

/// Preamble of every agent pass.
pub const AGENT_SYSTEM_PROMPT: &str = "You are a research assistant answering questions \
about a corpus of structured records (for example public tenders or customs \
classification entries). Use the available tools to find and read the records \
that answer the question. Ground every claim in a record you retrieved and cite \
records by id. When the tools cannot find an answer, say so plainly instead of \
guessing.";

const WORKING_RULES: &str = "\
- Prefer `find_best_match` when the user wants the single record that fits a description, \
and `find_top_matches` when they want a short list.
- Use `search_records` for quick exploratory lookups and `fetch_record` to read a record in full.
- If a tool fails, read the error, adjust the arguments or pick another tool. Do not repeat an \
identical failing call.
- Answer in the user's language. Structure the answer with short headings or lists when it \
compares several records.";

/// Builder for multi-section system prompts.
///
/// ```
/// use dossier_rs::agent::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are an agent.")
///     .section("Context", "Today is Monday.")
///     .section_opt("Missing", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Context"));
/// assert!(!prompt.contains("## Missing"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// The `content_fn` is only called when `condition` is true.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// The system prompt for an agent pass: the configured override or the
/// built-in preamble, followed by the exposed tools and working rules.
pub fn agent_system_prompt(override_prompt: Option<&str>, catalog: &ToolCatalog) -> String {
    let names = catalog.active_names();
    SystemPromptBuilder::new(override_prompt.unwrap_or(AGENT_SYSTEM_PROMPT))
        .section_if(!names.is_empty(), "Available tools", || {
            names
                .iter()
                .map(|n| format!("- `{n}`"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .section_if(!names.is_empty(), "Working rules", || WORKING_RULES.into())
        .build()
}

/// User message appended when the iteration budget runs out.
pub const BUDGET_EXHAUSTED_PROMPT: &str = "You have used all available tool iterations. \
Do not call any more tools. Write your final answer now using only the information \
gathered so far, and state clearly which parts of the question remain unverified.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{FnTool, ToolOutput};
    use crate::tools::spec::ToolSpec;

    #[test]
    fn sections_use_heading_prefix() {
        let prompt = SystemPromptBuilder::new("Preamble")
            .section("Context", "Some context")
            .build();
        assert_eq!(prompt, "Preamble\n\n## Context\n\nSome context");
    }

    #[test]
    fn empty_and_conditional_sections_skipped() {
        let prompt = SystemPromptBuilder::new("P")
            .section("Empty", "")
            .section_if(false, "Hidden", || "x".into())
            .section_opt("Present", Some("here"))
            .build();
        assert!(!prompt.contains("Empty"));
        assert!(!prompt.contains("Hidden"));
        assert!(prompt.contains("## Present\n\nhere"));
    }

    #[test]
    fn agent_prompt_lists_active_tools() {
        let catalog = ToolCatalog::new()
            .with(FnTool::new(
                ToolSpec::builder("fetch_record", "Fetch").build(),
                |_: serde_json::Value| async move { Ok(ToolOutput::text("")) },
            ))
            .unwrap();
        let prompt = agent_system_prompt(None, &catalog);
        assert!(prompt.starts_with(AGENT_SYSTEM_PROMPT));
        assert!(prompt.contains("- `fetch_record`"));

        let custom = agent_system_prompt(Some("Custom preamble."), &ToolCatalog::new());
        assert_eq!(custom, "Custom preamble.");
    }
}
