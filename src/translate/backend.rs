//! Pluggable translation backend trait.
//!
//! Implementations translate a finished prompt into one endpoint call,
//! handling transport and status classification. This keeps the retry
//! client and the workers decoupled from any particular LLM vendor;
//! tests substitute scripted backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TranslateError;

/// Token accounting reported by the endpoint for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub prompt_token_count: u32,
    /// Tokens generated in the response.
    #[serde(default)]
    pub candidates_token_count: u32,
    /// Total tokens for the call.
    #[serde(default)]
    pub total_token_count: u32,
}

/// One successful endpoint generation.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// The generated text.
    pub text: String,
    /// Endpoint-reported token usage.
    pub usage: UsageMetadata,
}

/// Trait for translation endpoint backends.
///
/// Implementations perform exactly one call per [`Self::generate`]
/// invocation; retry policy belongs to the client layer above.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Backend name (e.g. `"gemini"`, `"mock"`).
    fn name(&self) -> &'static str;

    /// Executes one generation request.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError`] classified by the endpoint's status
    /// taxonomy: 429/5xx retryable, 400/401/403 and unknown statuses
    /// permanent, network failures permanent unless explicitly tagged
    /// transient.
    async fn generate(&self, prompt: &str) -> Result<GenerationOutput, TranslateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_metadata_wire_names() {
        let json = r#"{
            "promptTokenCount": 120,
            "candidatesTokenCount": 80,
            "totalTokenCount": 200
        }"#;
        let usage: UsageMetadata =
            serde_json::from_str(json).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(usage.prompt_token_count, 120);
        assert_eq!(usage.candidates_token_count, 80);
        assert_eq!(usage.total_token_count, 200);
    }

    #[test]
    fn test_usage_metadata_fields_default() {
        let usage: UsageMetadata =
            serde_json::from_str("{}").unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(usage.total_token_count, 0);
    }
}
