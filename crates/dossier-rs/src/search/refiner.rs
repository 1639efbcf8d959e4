//! Query refinement between search rounds.

use super::SearchRoundRecord;
use crate::api::model::{LanguageModel, call_model, json_request, parse_json_reply};
use crate::corpus::UserContext;
use crate::error::ProviderError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const REFINER_SYSTEM_PROMPT: &str = "You rewrite search queries for a similarity \
search over structured records. Given the user's original request, the queries already \
tried and what each round found, produce one new query that is more likely to surface the \
record the user wants. Keep the user's constraints, vary the wording, and target what \
earlier rounds were missing. Reply with a JSON object: {\"query\": string, \"rationale\": string}.";

#[derive(Debug, Deserialize)]
struct RefinedQuery {
    query: String,
    #[serde(default)]
    rationale: String,
}

/// Inputs to one refinement.
pub struct RefinementContext<'a> {
    pub original: &'a str,
    pub prior_rounds: &'a [SearchRoundRecord],
    pub user_context: Option<&'a UserContext>,
    /// Free-form hint from the caller (for example, the conversation so far).
    pub hint: Option<&'a str>,
}

/// Asks the model for the next round's query.
pub struct QueryRefiner<'a> {
    model: &'a dyn LanguageModel,
    model_name: &'a str,
    timeout: Duration,
    max_tokens: u32,
}

impl<'a> QueryRefiner<'a> {
    pub fn new(model: &'a dyn LanguageModel, model_name: &'a str, timeout: Duration) -> Self {
        Self {
            model,
            model_name,
            timeout,
            max_tokens: 512,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The refined query, or an error if the model failed or replied with
    /// an empty query.
    pub async fn refine(&self, ctx: &RefinementContext<'_>) -> Result<String, ProviderError> {
        let request = json_request(
            self.model_name,
            REFINER_SYSTEM_PROMPT,
            render_prompt(ctx),
            self.max_tokens,
            0.4,
        );
        let completion = call_model(self.model, &request, self.timeout).await?;
        let reply: RefinedQuery = parse_json_reply(&completion)?;
        let query = reply.query.trim();
        if query.is_empty() {
            return Err(ProviderError::Malformed("refiner returned an empty query".into()));
        }
        debug!("Refined query: {query:?} ({})", reply.rationale);
        Ok(query.to_string())
    }

    /// [`refine`](Self::refine), falling back to the original request.
    pub async fn refine_or_original(&self, ctx: &RefinementContext<'_>) -> (String, bool) {
        match self.refine(ctx).await {
            Ok(q) => (q, true),
            Err(e) => {
                warn!("Query refinement failed, reusing the original request: {e}");
                (ctx.original.to_string(), false)
            }
        }
    }
}

/// Render the typed round history as the refinement prompt.
pub fn render_prompt(ctx: &RefinementContext<'_>) -> String {
    let mut out = format!("Original request:\n{}\n", ctx.original);

    if !ctx.prior_rounds.is_empty() {
        out.push_str("\nPrevious rounds:\n");
        for round in ctx.prior_rounds {
            out.push_str(&format!(
                "{}. query: {:?} -> {}\n",
                round.round,
                round.query,
                round.feedback.render()
            ));
        }
    }

    if let Some(user) = ctx.user_context.filter(|u| !u.is_empty()) {
        out.push_str(&format!("\nUser context:\n{}\n", user.render()));
    }
    if let Some(hint) = ctx.hint.filter(|h| !h.trim().is_empty()) {
        out.push_str(&format!("\nAdditional context:\n{hint}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RoundFeedback;
    use crate::test_support::ScriptedModel;
    use crate::ChatCompletion;

    fn round(n: u32, query: &str, feedback: RoundFeedback) -> SearchRoundRecord {
        SearchRoundRecord {
            round: n,
            query: query.into(),
            refined: n > 1,
            candidates: vec![],
            error: None,
            feedback,
        }
    }

    #[test]
    fn prompt_renders_rounds_in_order() {
        let rounds = vec![
            round(1, "road works", RoundFeedback::Weak {
                record_id: "B".into(),
                score: 3,
            }),
            round(2, "road maintenance Leon", RoundFeedback::Strong {
                record_id: "A".into(),
                score: 9,
            }),
        ];
        let prompt = render_prompt(&RefinementContext {
            original: "road maintenance in Leon",
            prior_rounds: &rounds,
            user_context: None,
            hint: Some("user works for a paving company"),
        });
        assert!(prompt.starts_with("Original request:\nroad maintenance in Leon"));
        let first = prompt.find("1. query").unwrap();
        let second = prompt.find("2. query").unwrap();
        assert!(first < second);
        assert!(prompt.contains("weak result B (3/10)"));
        assert!(prompt.contains("paving company"));
    }

    #[tokio::test]
    async fn falls_back_to_original_on_bad_reply() {
        let model = ScriptedModel::new().with_refiner(|_| ChatCompletion::text("not json"));
        let refiner = QueryRefiner::new(&model, "m", Duration::from_secs(1));
        let (query, refined) = refiner
            .refine_or_original(&RefinementContext {
                original: "orig",
                prior_rounds: &[],
                user_context: None,
                hint: None,
            })
            .await;
        assert_eq!(query, "orig");
        assert!(!refined);
    }

    #[tokio::test]
    async fn parses_refined_query() {
        let model = ScriptedModel::new().with_refiner(|_| {
            ChatCompletion::text(r#"{"query": " bridge inspection tender ", "rationale": "narrower"}"#)
        });
        let refiner = QueryRefiner::new(&model, "m", Duration::from_secs(1));
        let query = refiner
            .refine(&RefinementContext {
                original: "bridges",
                prior_rounds: &[],
                user_context: None,
                hint: None,
            })
            .await
            .unwrap();
        assert_eq!(query, "bridge inspection tender");
    }
}
