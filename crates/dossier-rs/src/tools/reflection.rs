//! Structured reflection on tool failures.
//!
//! A failed [`ToolResult`](super::executor::ToolResult) is rendered for the
//! model with its machine-readable kind, the error, and recovery hints, so
//! the model can retry with different arguments, pick another tool, or
//! answer with caveats.

use crate::error::ToolErrorKind;

/// Format a tool failure as the tool message the model will read.
pub fn format_tool_failure(
    tool_name: &str,
    arguments: &str,
    kind: ToolErrorKind,
    error: &str,
    available_tools: &[String],
) -> String {
    let mut msg = format!("Error ({kind}) from tool '{tool_name}':\n  {error}\n");

    let suggestions = recovery_hints(kind, error, available_tools);
    msg.push_str("\nPossible causes and recovery:\n");
    for suggestion in &suggestions {
        msg.push_str(&format!("  - {suggestion}\n"));
    }

    let args_preview: String = arguments.chars().take(200).collect();
    msg.push_str(&format!("\nArguments used: {args_preview}"));
    if arguments.chars().count() > 200 {
        msg.push_str("...");
    }
    msg
}

fn recovery_hints(kind: ToolErrorKind, error: &str, available_tools: &[String]) -> Vec<String> {
    let error_lower = error.to_lowercase();
    let mut hints = Vec::new();

    match kind {
        ToolErrorKind::NotFound => {
            hints.push("This tool does not exist. Do not call it again.".into());
            if !available_tools.is_empty() {
                hints.push(format!("Available tools: {}.", available_tools.join(", ")));
            }
        }
        ToolErrorKind::SchemaValidation => {
            hints.push(
                "Check that the arguments are valid JSON with the field names and types \
                 the tool's schema declares."
                    .into(),
            );
        }
        ToolErrorKind::Timeout => {
            hints.push(
                "The operation took too long. Try a narrower query or a different tool.".into(),
            );
        }
        ToolErrorKind::Execution => {
            if error_lower.contains("not found") || error_lower.contains("does not exist") {
                hints.push(
                    "The record id may be wrong. Use search_records to discover valid ids.".into(),
                );
            }
            if error_lower.contains("timed out") || error_lower.contains("timeout") {
                hints.push("A backend call timed out. Retrying once is reasonable.".into());
            }
        }
    }

    if hints.is_empty() {
        hints.push("Review the error message and adjust your approach.".into());
        hints.push(
            "If the information cannot be obtained, answer with what you have and say what is missing."
                .into(),
        );
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_lists_alternatives() {
        let result = format_tool_failure(
            "does_not_exist",
            "{}",
            ToolErrorKind::NotFound,
            "unknown tool 'does_not_exist'",
            &["search_records".into(), "fetch_record".into()],
        );
        assert!(result.contains("Error (not_found)"));
        assert!(result.contains("search_records, fetch_record"));
    }

    #[test]
    fn missing_record_suggests_search() {
        let result = format_tool_failure(
            "fetch_record",
            r#"{"record_id": "X"}"#,
            ToolErrorKind::Execution,
            "record 'X' not found",
            &[],
        );
        assert!(result.contains("search_records"));
        assert!(result.contains(r#"Arguments used: {"record_id": "X"}"#));
    }

    #[test]
    fn schema_and_generic_hints() {
        let schema = format_tool_failure("t", "bad", ToolErrorKind::SchemaValidation, "x", &[]);
        assert!(schema.contains("valid JSON"));
        let generic = format_tool_failure("t", "{}", ToolErrorKind::Execution, "boom", &[]);
        assert!(generic.contains("adjust your approach"));
    }

    #[test]
    fn long_arguments_are_previewed() {
        let args = "x".repeat(300);
        let result = format_tool_failure("t", &args, ToolErrorKind::Timeout, "slow", &[]);
        assert!(result.ends_with("..."));
    }
}
