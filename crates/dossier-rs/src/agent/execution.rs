//! Per-iteration mechanics of the agent loop: building and sending the
//! decision request, dispatching one round of tool calls, and the forced
//! final answer once the budget is spent.
//!
//! These functions are called by [`super::harness::AgentLoop::run()`].

use super::config::AgentConfig;
use super::prompt::BUDGET_EXHAUSTED_PROMPT;
use crate::api::model::{LanguageModel, call_model_with_retry};
use crate::error::ProviderError;
use crate::tools::executor::{ToolExecutor, ToolInvocation};
use crate::{ChatCompletion, ChatRequest, Message, ToolCall, ToolDef};
use tracing::{debug, trace};

/// Answer used when the forced final call comes back empty.
pub(crate) const EMPTY_FINAL_ANSWER: &str = "I could not complete this answer within the \
available tool budget, and no partial findings were produced. Please narrow the question \
or try again.";

// ── Decision request ──────────────────────────────────────────────

fn decision_request(
    config: &AgentConfig,
    messages: &[Message],
    tools: Option<&[ToolDef]>,
) -> ChatRequest {
    ChatRequest {
        model: Some(config.model.clone()),
        messages: messages.to_vec(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        tools: tools.map(<[ToolDef]>::to_vec),
        ..Default::default()
    }
}

/// Ask the model for its next decision: tool calls, final text, or both.
pub(crate) async fn request_decision(
    model: &dyn LanguageModel,
    config: &AgentConfig,
    messages: &[Message],
    tools: Option<&[ToolDef]>,
) -> Result<ChatCompletion, ProviderError> {
    let request = decision_request(config, messages, tools);
    trace!(
        "Decision request: {} message(s), {} tool(s)",
        request.messages.len(),
        request.tools.as_ref().map_or(0, Vec::len)
    );
    let completion =
        call_model_with_retry(model, &request, config.model_timeout(), &config.retry).await?;
    if let Some(usage) = &completion.usage {
        debug!(
            "Usage: prompt={:?} completion={:?}",
            usage.prompt_tokens, usage.completion_tokens
        );
    }
    Ok(completion)
}

// ── Tool round ────────────────────────────────────────────────────

/// Execute one iteration's tool calls and append the assistant and tool
/// messages to the conversation.
///
/// `sequence` is the running invocation counter of the pass; it is advanced
/// by the number of calls. Every call gets exactly one tool message, in the
/// order the model requested them.
pub(crate) async fn execute_tool_round(
    executor: &mut ToolExecutor<'_>,
    messages: &mut Vec<Message>,
    completion: &ChatCompletion,
    iteration: u32,
    sequence: &mut u32,
    available_tools: &[String],
) {
    let calls: &[ToolCall] = &completion.tool_calls;
    let mut assistant = Message::assistant_tool_calls(calls.to_vec());
    assistant.content = completion.content.clone().filter(|c| !c.trim().is_empty());
    messages.push(assistant);

    let invocations: Vec<ToolInvocation> = calls
        .iter()
        .map(|call| {
            *sequence += 1;
            ToolInvocation::from_call(call, iteration, *sequence)
        })
        .collect();

    let start = executor.transcript().len();
    executor.execute_all(invocations).await;

    for exchange in executor.transcript().iter().skip(start) {
        messages.push(Message::tool_result(
            exchange.invocation.call_id.clone(),
            exchange.to_model_content(available_tools),
        ));
    }
}

// ── Forced final answer ───────────────────────────────────────────

/// Produce an answer from accumulated context with tools withheld.
///
/// Never returns empty text: an empty reply is replaced with
/// [`EMPTY_FINAL_ANSWER`].
pub(crate) async fn force_final_answer(
    model: &dyn LanguageModel,
    config: &AgentConfig,
    messages: &mut Vec<Message>,
) -> Result<String, ProviderError> {
    messages.push(Message::user(BUDGET_EXHAUSTED_PROMPT));
    let completion = request_decision(model, config, messages, None).await?;
    let answer = completion
        .content
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| EMPTY_FINAL_ANSWER.to_string());
    messages.push(Message::assistant_text(answer.clone()));
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::test_support::ScriptedModel;
    use crate::tools::core::{FnTool, ToolCatalog, ToolOutput};
    use crate::tools::spec::ToolSpec;
    use std::time::Duration;

    #[test]
    fn request_carries_tools_only_when_given() {
        let config = AgentConfig::default().with_model("m");
        let defs = vec![ToolDef::new("t", "d", serde_json::json!({"type": "object"}))];
        let with = decision_request(&config, &[Message::user("q")], Some(&defs));
        assert_eq!(with.tools.map(|t| t.len()), Some(1));
        let without = decision_request(&config, &[Message::user("q")], None);
        assert!(without.tools.is_none());
        assert_eq!(without.model.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn tool_round_appends_one_message_per_call() {
        let catalog = ToolCatalog::new()
            .with(FnTool::new(
                ToolSpec::builder("ping", "Ping").build(),
                |_: serde_json::Value| async move { Ok(ToolOutput::text("pong")) },
            ))
            .unwrap();
        let mut executor = ToolExecutor::new(&catalog, Duration::from_secs(1));
        let mut messages = vec![Message::user("q")];
        let completion = ChatCompletion::tool_calls(vec![
            ToolCall::new("c1", "ping", "{}"),
            ToolCall::new("c2", "nope", "{}"),
        ]);
        let mut sequence = 4;
        execute_tool_round(
            &mut executor,
            &mut messages,
            &completion,
            2,
            &mut sequence,
            &catalog.active_names(),
        )
        .await;

        assert_eq!(sequence, 6);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[2].content.as_deref(), Some("pong"));
        assert!(messages[3].content.as_deref().unwrap().contains("not_found"));
        assert_eq!(executor.transcript()[1].invocation.sequence, 6);
    }

    #[tokio::test]
    async fn forced_answer_is_never_empty() {
        let model = ScriptedModel::new().with_agent_replies([ChatCompletion::text("   ")]);
        let mut messages = vec![Message::user("q")];
        let answer = force_final_answer(&model, &AgentConfig::default(), &mut messages)
            .await
            .unwrap();
        assert_eq!(answer, EMPTY_FINAL_ANSWER);
        assert!(model.requests()[0].tools.is_none());
        assert_eq!(
            model.requests()[0].last_user_message(),
            Some(BUDGET_EXHAUSTED_PROMPT)
        );
    }
}
