//! Structured tool specifications.
//!
//! A [`ToolSpec`] is the immutable registration record of a tool: its unique
//! name, the description the model reads, the JSON Schema its arguments must
//! satisfy, and the [`Capability`] tag that decides whether it is exposed by
//! default. Descriptions are assembled from structured fields (purpose, when
//! to use, when not to use) because the negative guidance is what keeps the
//! model from confusing `search_records` with `find_best_match`.

use crate::ToolDef;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether a tool is exposed by default or only when enabled by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    AlwaysOn,
    OptIn,
}

/// A registered tool's static description.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique within a [`ToolCatalog`](super::core::ToolCatalog).
    pub name: String,
    /// One-sentence imperative purpose.
    pub purpose: String,
    pub when_to_use: String,
    /// Guidance that separates this tool from similar ones.
    pub when_not_to_use: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
    pub examples: Vec<UsageExample>,
    pub output_format: String,
    pub capability: Capability,
    /// Replaces the executor's per-tool timeout for this tool.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct UsageExample {
    pub input: String,
    pub output: String,
}

impl ToolSpec {
    /// Start a spec. Name and purpose are the only required fields.
    pub fn builder(name: impl Into<String>, purpose: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            spec: ToolSpec {
                name: name.into(),
                purpose: purpose.into(),
                when_to_use: String::new(),
                when_not_to_use: String::new(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
                examples: Vec::new(),
                output_format: String::new(),
                capability: Capability::AlwaysOn,
                timeout: None,
            },
        }
    }

    /// The description string the model sees.
    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if !self.when_to_use.is_empty() {
            desc.push_str(&format!("\nWhen to use: {}", self.when_to_use));
        }
        if !self.when_not_to_use.is_empty() {
            desc.push_str(&format!("\nWhen NOT to use: {}", self.when_not_to_use));
        }
        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for ex in &self.examples {
                desc.push_str(&format!("\n  - Input: {} -> {}", ex.input, ex.output));
            }
        }
        if !self.output_format.is_empty() {
            desc.push_str(&format!("\nOutput format: {}", self.output_format));
        }
        desc
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = when.into();
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = when_not.into();
        self
    }

    pub fn parameters(mut self, params: serde_json::Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Derive the parameter schema from the type the tool deserializes into.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push(UsageExample {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.spec.output_format = format.into();
        self
    }

    /// Mark the tool as opt-in: registered, but hidden until enabled.
    pub fn opt_in(mut self) -> Self {
        self.spec.capability = Capability::OptIn;
        self
    }

    /// Run under `timeout` instead of the executor default. For tools that
    /// bound their own inner calls and need longer than a single lookup.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }
}
