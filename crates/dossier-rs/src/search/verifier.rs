//! Content verification: does a full record really answer the request?

use crate::api::model::{LanguageModel, call_model, json_request, parse_json_reply};
use crate::corpus::Record;
use crate::error::ProviderError;
use serde::Deserialize;
use std::time::Duration;

pub const VERIFIER_SYSTEM_PROMPT: &str = "You check whether a record truly satisfies a \
search request. Read the full record, not just its title. Score the correspondence from 0 \
(unrelated) to 10 (exactly what was asked for), and list which aspects of the request the \
record covers and which it misses. Reply with a JSON object: {\"score\": integer 0-10, \
\"corresponds\": boolean, \"reasoning\": string, \"matched_aspects\": [string], \
\"missing_aspects\": [string]}.";

/// The model's judgement of one record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verification {
    /// Clamped to 0-10.
    #[serde(deserialize_with = "clamped_score")]
    pub score: u8,
    pub corresponds: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub matched_aspects: Vec<String>,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
}

fn clamped_score<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let raw = f64::deserialize(d)?;
    Ok(raw.round().clamp(0.0, 10.0) as u8)
}

pub struct ContentVerifier<'a> {
    model: &'a dyn LanguageModel,
    model_name: &'a str,
    timeout: Duration,
    max_record_chars: usize,
    max_tokens: u32,
}

impl<'a> ContentVerifier<'a> {
    pub fn new(model: &'a dyn LanguageModel, model_name: &'a str, timeout: Duration) -> Self {
        Self {
            model,
            model_name,
            timeout,
            max_record_chars: 6_000,
            max_tokens: 1024,
        }
    }

    pub fn with_max_record_chars(mut self, max: usize) -> Self {
        self.max_record_chars = max;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn verify(&self, request: &str, record: &Record) -> Result<Verification, ProviderError> {
        let user = format!(
            "Search request:\n{request}\n\nRecord:\n{}",
            record.render(self.max_record_chars)
        );
        let chat = json_request(
            self.model_name,
            VERIFIER_SYSTEM_PROMPT,
            user,
            self.max_tokens,
            0.0,
        );
        let completion = call_model(self.model, &chat, self.timeout).await?;
        parse_json_reply(&completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatCompletion;
    use crate::test_support::ScriptedModel;

    #[test]
    fn score_is_clamped() {
        let v: Verification =
            serde_json::from_str(r#"{"score": 14, "corresponds": true}"#).unwrap();
        assert_eq!(v.score, 10);
        let v: Verification =
            serde_json::from_str(r#"{"score": -2, "corresponds": false}"#).unwrap();
        assert_eq!(v.score, 0);
        let v: Verification =
            serde_json::from_str(r#"{"score": 7.6, "corresponds": true}"#).unwrap();
        assert_eq!(v.score, 8);
    }

    #[tokio::test]
    async fn sends_full_record() {
        let model = ScriptedModel::new().with_verifier(|_| {
            ChatCompletion::text(
                r#"{"score": 9, "corresponds": true, "reasoning": "exact", "matched_aspects": ["region"]}"#,
            )
        });
        let record = Record::new("A", "Road maintenance")
            .with_field("region", "Leon")
            .with_body("Resurfacing of 12 km of rural roads.");
        let verifier = ContentVerifier::new(&model, "m", Duration::from_secs(1));
        let v = verifier.verify("roads in Leon", &record).await.unwrap();
        assert_eq!(v.score, 9);
        assert!(v.corresponds);
        assert_eq!(v.matched_aspects, vec!["region".to_string()]);

        let sent = model.requests()[0].last_user_message().unwrap().to_string();
        assert!(sent.contains("Resurfacing of 12 km"));
    }
}
