//! Job records and the translation job state machine.
//!
//! A job tracks one document through chunking and translation. The
//! record is persisted in the key-value job store under
//! `(jobId, userId)` and is mutated by the chunker once, then by each
//! translation worker through conditional updates. Status advances
//! monotonically; regressions are rejected by [`JobStatus::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a translation job.
///
/// ```text
/// PENDING_UPLOAD → CHUNKING → CHUNKED → TRANSLATION_IN_PROGRESS → TRANSLATION_COMPLETED
///                      │                         │
///                      ▼                         ▼
///               CHUNKING_FAILED          TRANSLATION_FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created externally; source object not yet chunked.
    PendingUpload,
    /// Chunker is running.
    Chunking,
    /// Chunk objects written; ready for translation fan-out.
    Chunked,
    /// Chunker failed; terminal.
    ChunkingFailed,
    /// At least one worker has advanced progress.
    TranslationInProgress,
    /// Every chunk translated; terminal.
    TranslationCompleted,
    /// A non-retryable worker error occurred; terminal.
    TranslationFailed,
}

impl JobStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::PendingUpload, Self::Chunking)
                | (Self::Chunking, Self::Chunked | Self::ChunkingFailed)
                | (
                    Self::Chunked,
                    Self::TranslationInProgress | Self::TranslationFailed
                )
                | (
                    Self::TranslationInProgress,
                    Self::TranslationCompleted | Self::TranslationFailed
                )
        )
    }

    /// Whether this state admits translation work.
    #[must_use]
    pub const fn accepts_translation(self) -> bool {
        matches!(self, Self::Chunked | Self::TranslationInProgress)
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ChunkingFailed | Self::TranslationCompleted | Self::TranslationFailed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingUpload => "PENDING_UPLOAD",
            Self::Chunking => "CHUNKING",
            Self::Chunked => "CHUNKED",
            Self::ChunkingFailed => "CHUNKING_FAILED",
            Self::TranslationInProgress => "TRANSLATION_IN_PROGRESS",
            Self::TranslationCompleted => "TRANSLATION_COMPLETED",
            Self::TranslationFailed => "TRANSLATION_FAILED",
        };
        write!(f, "{s}")
    }
}

/// Requested tone of the translated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    /// Formal register.
    Formal,
    /// Informal register.
    Informal,
    /// Neutral register.
    #[default]
    Neutral,
}

impl std::str::FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "formal" => Ok(Self::Formal),
            "informal" => Ok(Self::Informal),
            "neutral" => Ok(Self::Neutral),
            other => Err(format!(
                "unknown tone '{other}' (expected formal, informal, or neutral)"
            )),
        }
    }
}

/// Persisted record of one translation job.
///
/// Optional fields stay absent until the stage that owns them runs.
/// Unknown fields are tolerated on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque unique job id.
    pub job_id: String,
    /// Owning user.
    pub user_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Target language code (validated by the translation client).
    pub target_language: String,
    /// Requested output tone.
    #[serde(default)]
    pub tone: Tone,
    /// Object-store key of the source document.
    #[serde(default)]
    pub source_key: Option<String>,

    // Chunking metadata, written once by the chunker.
    /// Number of chunks produced.
    #[serde(default)]
    pub total_chunks: u32,
    /// Ordered object-store keys of the chunk objects.
    #[serde(default)]
    pub chunk_keys: Vec<String>,
    /// Token count of the source document.
    #[serde(default)]
    pub original_token_count: usize,
    /// Mean chunk size in tokens.
    #[serde(default)]
    pub average_chunk_size: usize,
    /// Chunking wall-clock time in milliseconds.
    #[serde(default)]
    pub chunking_processing_time_ms: u64,

    // Translation progress, advanced by workers.
    /// Chunks translated so far. Monotonically non-decreasing,
    /// never exceeds `total_chunks`.
    #[serde(default)]
    pub translated_chunks: u32,
    /// Cumulative endpoint tokens consumed.
    #[serde(default)]
    pub tokens_used: u64,
    /// Cumulative estimated cost in USD.
    #[serde(default)]
    pub estimated_cost: f64,
    /// When the first worker advanced progress.
    #[serde(default)]
    pub translation_started_at: Option<DateTime<Utc>>,
    /// When the final chunk completed.
    #[serde(default)]
    pub translation_completed_at: Option<DateTime<Utc>>,
    /// First non-retryable error, when failed.
    #[serde(default)]
    pub error_message: Option<String>,
    /// When the job was marked failed.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Last mutation timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a fresh job in `PENDING_UPLOAD`.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        target_language: impl Into<String>,
        tone: Tone,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            status: JobStatus::PendingUpload,
            target_language: target_language.into(),
            tone,
            source_key: None,
            total_chunks: 0,
            chunk_keys: Vec::new(),
            original_token_count: 0,
            average_chunk_size: 0,
            chunking_processing_time_ms: 0,
            translated_chunks: 0,
            tokens_used: 0,
            estimated_cost: 0.0,
            translation_started_at: None,
            translation_completed_at: None,
            error_message: None,
            failed_at: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(JobStatus::PendingUpload, JobStatus::Chunking, true)]
    #[test_case(JobStatus::Chunking, JobStatus::Chunked, true)]
    #[test_case(JobStatus::Chunking, JobStatus::ChunkingFailed, true)]
    #[test_case(JobStatus::Chunked, JobStatus::TranslationInProgress, true)]
    #[test_case(JobStatus::TranslationInProgress, JobStatus::TranslationCompleted, true)]
    #[test_case(JobStatus::TranslationInProgress, JobStatus::TranslationFailed, true)]
    #[test_case(JobStatus::Chunked, JobStatus::TranslationFailed, true)]
    #[test_case(JobStatus::Chunked, JobStatus::PendingUpload, false)]
    #[test_case(JobStatus::TranslationCompleted, JobStatus::TranslationFailed, false)]
    #[test_case(JobStatus::TranslationFailed, JobStatus::TranslationInProgress, false)]
    #[test_case(JobStatus::ChunkingFailed, JobStatus::Chunked, false)]
    #[test_case(JobStatus::PendingUpload, JobStatus::Chunked, false)]
    fn test_transitions(from: JobStatus, to: JobStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_translation_gate() {
        assert!(JobStatus::Chunked.accepts_translation());
        assert!(JobStatus::TranslationInProgress.accepts_translation());
        assert!(!JobStatus::PendingUpload.accepts_translation());
        assert!(!JobStatus::TranslationCompleted.accepts_translation());
        assert!(!JobStatus::ChunkingFailed.accepts_translation());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::ChunkingFailed.is_terminal());
        assert!(JobStatus::TranslationCompleted.is_terminal());
        assert!(JobStatus::TranslationFailed.is_terminal());
        assert!(!JobStatus::Chunked.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::TranslationInProgress).unwrap_or_default();
        assert_eq!(json, "\"TRANSLATION_IN_PROGRESS\"");
        let back: JobStatus =
            serde_json::from_str("\"CHUNKING_FAILED\"").unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(back, JobStatus::ChunkingFailed);
    }

    #[test]
    fn test_job_serde_roundtrip() {
        let mut job = Job::new("job-1", "user-1", "es", Tone::Formal);
        job.status = JobStatus::Chunked;
        job.total_chunks = 3;
        job.chunk_keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let json = serde_json::to_string(&job).unwrap_or_default();
        assert!(json.contains("\"jobId\""));
        assert!(json.contains("\"targetLanguage\""));
        assert!(json.contains("\"translatedChunks\""));
        let back: Job = serde_json::from_str(&json).unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(back.total_chunks, 3);
        assert_eq!(back.chunk_keys.len(), 3);
        assert_eq!(back.tone, Tone::Formal);
    }

    #[test]
    fn test_tone_parsing() {
        assert_eq!("FORMAL".parse::<Tone>(), Ok(Tone::Formal));
        assert_eq!("neutral".parse::<Tone>(), Ok(Tone::Neutral));
        assert!("brisk".parse::<Tone>().is_err());
    }
}
