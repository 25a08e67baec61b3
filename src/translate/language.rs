//! Supported target languages.
//!
//! The endpoint accepts a closed enumeration; anything else fails
//! before a request is built.

use serde::{Deserialize, Serialize};

use crate::error::TranslateError;

/// Target languages the pipeline translates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    /// Spanish.
    Es,
    /// French.
    Fr,
    /// Italian.
    It,
    /// German.
    De,
    /// Chinese (Simplified).
    Zh,
}

impl TargetLanguage {
    /// The two-letter wire code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Es => "es",
            Self::Fr => "fr",
            Self::It => "it",
            Self::De => "de",
            Self::Zh => "zh",
        }
    }

    /// Human-readable name used in the prompt.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Es => "Spanish",
            Self::Fr => "French",
            Self::It => "Italian",
            Self::De => "German",
            Self::Zh => "Chinese (Simplified)",
        }
    }

    /// Parses a language code.
    ///
    /// # Errors
    ///
    /// [`TranslateError::UnsupportedLanguage`] for anything outside
    /// the supported set. Non-retryable.
    pub fn parse(code: &str) -> Result<Self, TranslateError> {
        match code.to_ascii_lowercase().as_str() {
            "es" => Ok(Self::Es),
            "fr" => Ok(Self::Fr),
            "it" => Ok(Self::It),
            "de" => Ok(Self::De),
            "zh" => Ok(Self::Zh),
            other => Err(TranslateError::UnsupportedLanguage {
                code: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for TargetLanguage {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
