//! The language-model capability the core consumes.
//!
//! Every model call in the crate (agent decisions, query refinement, content
//! verification, response review) goes through [`LanguageModel::complete`]
//! wrapped in [`call_model`], which applies an explicit timeout. Structured
//! replies are requested in JSON mode and parsed with [`parse_json_reply`].

use super::retry::{RetryConfig, retry_model_call};
use crate::error::ProviderError;
use crate::{ChatCompletion, ChatRequest, Message, OpenRouterClient, ResponseFormat};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, trace};

/// Boxed future returned by [`LanguageModel::complete`].
pub type ModelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatCompletion, ProviderError>> + Send + 'a>>;

/// A chat-completion capable language model.
///
/// Given messages and (optionally) tool schemas, returns either final text
/// or tool calls. Implementations must be safe to share across concurrent
/// user turns.
pub trait LanguageModel: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a>;
}

impl LanguageModel for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a> {
        Box::pin(self.chat(request))
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<M> {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a> {
        (**self).complete(request)
    }
}

/// Invoke the model with a hard timeout.
pub async fn call_model(
    model: &dyn LanguageModel,
    request: &ChatRequest,
    timeout: Duration,
) -> Result<ChatCompletion, ProviderError> {
    match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Model call timed out after {:.0}s", timeout.as_secs_f64());
            Err(ProviderError::Timeout(timeout))
        }
    }
}

/// [`call_model`] under an explicit retry policy.
pub async fn call_model_with_retry(
    model: &dyn LanguageModel,
    request: &ChatRequest,
    timeout: Duration,
    retry: &RetryConfig,
) -> Result<ChatCompletion, ProviderError> {
    retry_model_call(retry, || call_model(model, request, timeout)).await
}

/// Build a JSON-mode request with a system and a user message.
pub fn json_request(
    model: &str,
    system: &str,
    user: String,
    max_tokens: u32,
    temperature: f32,
) -> ChatRequest {
    ChatRequest {
        model: Some(model.to_string()),
        messages: vec![Message::system(system), Message::user(user)],
        max_tokens,
        temperature,
        response_format: Some(ResponseFormat::json_object()),
        ..Default::default()
    }
}

/// Parse the first JSON object in a completion's text into `T`.
///
/// Models in JSON mode occasionally wrap the object in a code fence or add a
/// sentence around it, so everything outside the outermost braces is ignored.
pub fn parse_json_reply<T: DeserializeOwned>(completion: &ChatCompletion) -> Result<T, ProviderError> {
    let text = completion
        .content
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::Malformed("expected a JSON object, got no text".into()))?;
    trace!("Structured reply: {text}");

    let json = extract_json_object(text)
        .ok_or_else(|| ProviderError::Malformed(format!("no JSON object in reply: {}", preview(text))))?;

    serde_json::from_str(json)
        .map_err(|e| ProviderError::Malformed(format!("{e} in reply: {}", preview(text))))
}

/// The substring between the first `{` and the last `}`, inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    text.get(start..=end)
}

fn preview(text: &str) -> String {
    let p: String = text.chars().take(120).collect();
    if text.len() > p.len() { format!("{p}...") } else { p }
}
