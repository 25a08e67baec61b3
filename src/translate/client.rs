//! Translation client with bounded retry.
//!
//! Wraps a [`TranslationBackend`] in the retry machine: transient
//! failures (429, 5xx, timeouts) are retried up to `max_retries` with
//! exponential backoff and ±25% jitter; permanent failures surface
//! immediately with their classification intact. The client also owns
//! the cost model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::TranslateError;
use crate::job::Tone;

use super::backend::TranslationBackend;
use super::language::TargetLanguage;
use super::prompt::build_translation_prompt;

/// Per-call translation options.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// Language to translate into.
    pub target_language: TargetLanguage,
    /// Output register.
    pub tone: Tone,
    /// Optional free-form instructions appended to the prompt.
    pub additional_instructions: Option<String>,
    /// Whether to ask the model to preserve source formatting.
    pub preserve_formatting: bool,
}

impl TranslateOptions {
    /// Options with the given language and tone, defaults elsewhere.
    #[must_use]
    pub const fn new(target_language: TargetLanguage, tone: Tone) -> Self {
        Self {
            target_language,
            tone,
            additional_instructions: None,
            preserve_formatting: true,
        }
    }
}

/// Reference material supplied alongside the text.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext {
    /// Preceding material, oldest first. Never translated.
    pub previous_chunks: Vec<String>,
}

/// Token accounting for one translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBreakdown {
    /// Prompt-side tokens.
    pub input: u32,
    /// Generated tokens.
    pub output: u32,
    /// Total tokens.
    pub total: u32,
}

/// A completed translation.
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    /// The translated text.
    pub translated_text: String,
    /// Endpoint token usage.
    pub tokens_used: TokenBreakdown,
    /// Estimated cost in USD (input-token pricing).
    pub estimated_cost: f64,
    /// Wall-clock time including retries.
    pub processing_time: Duration,
    /// API attempts made (1 = no retries).
    pub attempts: u32,
}

/// Retrying translation client over a pluggable backend.
///
/// Constructed once per process and shared via `Arc`.
pub struct TranslationClient {
    backend: Arc<dyn TranslationBackend>,
    config: ClientConfig,
}

impl std::fmt::Debug for TranslationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationClient")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl TranslationClient {
    /// Creates a client over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn TranslationBackend>, config: ClientConfig) -> Self {
        Self { backend, config }
    }

    /// Translates `text` with bounded retry.
    ///
    /// # Errors
    ///
    /// Permanent failures return immediately with their
    /// classification; transient failures that outlive the retry
    /// budget return [`TranslateError::RetriesExhausted`] wrapping the
    /// final error.
    pub async fn translate(
        &self,
        text: &str,
        options: &TranslateOptions,
        context: &TranslationContext,
    ) -> Result<TranslationOutcome, TranslateError> {
        if text.trim().is_empty() {
            return Err(TranslateError::BadRequest {
                message: "nothing to translate".to_string(),
            });
        }

        let prompt = build_translation_prompt(text, options, context);
        let start = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            match self.backend.generate(&prompt).await {
                Ok(output) => {
                    let tokens_used = TokenBreakdown {
                        input: output.usage.prompt_token_count,
                        output: output.usage.candidates_token_count,
                        total: output.usage.total_token_count,
                    };
                    let estimated_cost = self.cost_of(tokens_used.input);
                    debug!(
                        attempts = attempt + 1,
                        tokens = tokens_used.total,
                        cost = estimated_cost,
                        "translation succeeded"
                    );
                    return Ok(TranslationOutcome {
                        translated_text: output.text,
                        tokens_used,
                        estimated_cost,
                        processing_time: start.elapsed(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    return Err(TranslateError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        ?delay,
                        error = %e,
                        "transient translation failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Estimated cost of `input_tokens` at the configured per-million
    /// input-token price.
    #[must_use]
    pub fn cost_of(&self, input_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1_000_000.0 * self.config.price_per_million_input_tokens
    }

    /// Delay before retry `attempt`: `initial × 2^attempt × (1 ± 0.25)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_retry_delay.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let jitter = rand::rng().random_range(0.75..=1.25);
        Duration::from_secs_f64(base * jitter)
    }
}
