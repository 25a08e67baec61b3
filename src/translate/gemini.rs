//! Gemini-style HTTP backend.
//!
//! Speaks the `generateContent` surface: JSON request with `contents`
//! parts, JSON response with `candidates` and `usageMetadata`. Any
//! endpoint exposing this shape works via the base-URL override.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::error::TranslateError;

use super::backend::{GenerationOutput, TranslationBackend, UsageMetadata};

/// Default API root.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

/// HTTP backend for Gemini-compatible endpoints.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    request_timeout: std::time::Duration,
}

impl GeminiBackend {
    /// Creates a backend for the configured model and endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: config.model.clone(),
            request_timeout: config.request_timeout,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn classify_status(status: u16, message: String) -> TranslateError {
        match status {
            401 | 403 => TranslateError::Auth { status, message },
            400 => TranslateError::BadRequest { message },
            429 => TranslateError::RateLimited { message },
            500..=599 => TranslateError::Upstream { status, message },
            _ => TranslateError::Unknown { status, message },
        }
    }

    fn classify_transport(e: &reqwest::Error) -> TranslateError {
        TranslateError::Network {
            message: e.to_string(),
            // Timeouts are the one transport failure worth retrying;
            // everything else stays opaque and permanent.
            transient: e.is_timeout(),
        }
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TranslationBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationOutput, TranslateError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig { temperature: 0.2 }),
        };

        let url = self.url();
        debug!(
            model = %self.model,
            url = %url.replace(&self.api_key, "[REDACTED]"),
            "sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(status = status.as_u16(), "endpoint request failed");
            return Err(Self::classify_status(status.as_u16(), body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::ResponseParse {
                message: e.to_string(),
            })?;

        let text: String = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(TranslateError::ResponseParse {
                message: "response carried no candidate text".to_string(),
            });
        }

        Ok(GenerationOutput {
            text,
            usage: parsed.usage_metadata.unwrap_or_default(),
        })
    }
}
