//! Translation client stack.
//!
//! A pluggable [`TranslationBackend`] performs single endpoint calls;
//! [`TranslationClient`] adds the bounded retry machine, prompt
//! construction, and the cost model. The shipped backend speaks the
//! Gemini-style `generateContent` HTTP surface.

pub mod backend;
pub mod client;
pub mod gemini;
pub mod language;
pub mod prompt;

pub use backend::{GenerationOutput, TranslationBackend, UsageMetadata};
pub use client::{
    TokenBreakdown, TranslateOptions, TranslationClient, TranslationContext, TranslationOutcome,
};
pub use gemini::GeminiBackend;
pub use language::TargetLanguage;
pub use prompt::build_translation_prompt;
