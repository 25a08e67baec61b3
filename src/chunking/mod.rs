//! Sliding-window document chunker.
//!
//! Partitions a long-form document into translator-sized chunks while
//! preserving sentence boundaries, then attaches bounded context
//! excerpts (`previousSummary` / `nextPreview`) so each chunk can be
//! translated independently yet coherently.
//!
//! # Pipeline
//!
//! ```text
//! raw text → sentence segmentation → greedy packing (≤ primary max)
//!          → oversized-sentence word split → context excerpt pass
//!          → self-validated Chunk sequence + metadata
//! ```
//!
//! The chunker is a pure transformation: any failure is fatal for the
//! job and is never retried.

pub mod context;
pub mod segment;
pub mod tokenizer;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::ChunkerConfig;
use crate::error::ChunkError;
use context::{leading_excerpt, trailing_excerpt};
use segment::{split_oversized, split_sentences};
use tokenizer::count_tokens;

/// A bounded-size unit of source text paired with context excerpts,
/// independently translatable.
///
/// Persisted as JSON under `chunks/<userId>/<fileId>/<chunkId>.json`;
/// unknown fields are tolerated on read, required fields are enforced
/// by deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Globally unique id, `chunk-<4-digit index>-of-<4-digit total>-<suffix>`.
    pub chunk_id: String,
    /// 0-based position in the chunk sequence.
    pub chunk_index: u32,
    /// Total chunks produced from the document.
    pub total_chunks: u32,
    /// The sentences to translate. In-order concatenation across all
    /// chunks recovers the document's normalized text.
    pub primary_content: String,
    /// Trailing excerpt of the preceding chunk's primary content.
    /// Empty for chunk 0.
    #[serde(default)]
    pub previous_summary: String,
    /// Leading excerpt of the following chunk's primary content.
    /// Empty for the last chunk.
    #[serde(default)]
    pub next_preview: String,
}

/// Summary statistics for a chunking run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Number of chunks emitted.
    pub total_chunks: u32,
    /// Token count of the full input document.
    pub original_token_count: usize,
    /// Mean primary-content token count across chunks.
    pub average_chunk_size: usize,
    /// Wall-clock time of the chunking run in milliseconds.
    pub processing_time_ms: u64,
}

/// Boundary-preserving document chunker.
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    /// Creates a chunker with the given configuration.
    #[must_use]
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Creates a chunker with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// Splits `text` into context-bearing chunks.
    ///
    /// Walks sentences in order, accumulating until the next sentence
    /// would exceed the primary limit; a sentence that alone exceeds
    /// the limit flushes the current chunk and is word-split into
    /// balanced sub-chunks. Context excerpts are computed after the
    /// primary sequence is fixed. Every emitted chunk is self-checked
    /// against the size invariants.
    ///
    /// # Errors
    ///
    /// [`ChunkError::EmptyInput`] for empty or whitespace-only input;
    /// [`ChunkError::InvariantViolation`] if a produced chunk fails
    /// self-validation.
    pub fn chunk(&self, text: &str) -> Result<(Vec<Chunk>, ChunkMetadata), ChunkError> {
        let start = Instant::now();

        if text.trim().is_empty() {
            return Err(ChunkError::EmptyInput);
        }

        let original_token_count = count_tokens(text);
        let sentences = split_sentences(text, &self.config.sentence_terminators);
        if sentences.is_empty() {
            return Err(ChunkError::EmptyInput);
        }

        let groups = self.pack_sentences(sentences);
        let chunks = self.assemble(&groups)?;

        let total_chunks = u32::try_from(chunks.len()).map_err(|_| {
            ChunkError::InvariantViolation {
                message: format!("chunk count {} exceeds u32", chunks.len()),
            }
        })?;
        let primary_tokens: usize = chunks
            .iter()
            .map(|c| count_tokens(&c.primary_content))
            .sum();
        let average_chunk_size = primary_tokens / chunks.len().max(1);

        let metadata = ChunkMetadata {
            total_chunks,
            original_token_count,
            average_chunk_size,
            processing_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        debug!(
            total_chunks,
            original_token_count,
            average_chunk_size,
            elapsed_ms = metadata.processing_time_ms,
            "document chunked"
        );

        Ok((chunks, metadata))
    }

    /// Checks the size invariants of a single chunk.
    ///
    /// Verifies the primary-content limit, both context budgets, the
    /// emptiness rules for the first and last chunk, and (when
    /// configured) the minimum chunk size for non-final chunks.
    #[must_use]
    pub fn validate(&self, chunk: &Chunk) -> bool {
        self.validate_detailed(chunk).is_ok()
    }

    /// [`Self::validate`] with a diagnostic message on failure.
    fn validate_detailed(&self, chunk: &Chunk) -> Result<(), ChunkError> {
        let fail = |message: String| Err(ChunkError::InvariantViolation { message });

        let primary = count_tokens(&chunk.primary_content);
        if primary > self.config.primary_chunk_size {
            return fail(format!(
                "chunk {} primary content is {primary} tokens (limit {})",
                chunk.chunk_id, self.config.primary_chunk_size
            ));
        }
        if chunk.primary_content.trim().is_empty() {
            return fail(format!("chunk {} has empty primary content", chunk.chunk_id));
        }

        let is_last = chunk.chunk_index + 1 == chunk.total_chunks;
        if let Some(min) = self.config.min_chunk_size
            && !is_last
            && chunk.total_chunks > 1
            && primary < min
        {
            return fail(format!(
                "chunk {} primary content is {primary} tokens (minimum {min})",
                chunk.chunk_id
            ));
        }

        let prev = count_tokens(&chunk.previous_summary);
        if prev > self.config.context_size {
            return fail(format!(
                "chunk {} previous summary is {prev} tokens (limit {})",
                chunk.chunk_id, self.config.context_size
            ));
        }
        let next = count_tokens(&chunk.next_preview);
        if next > self.config.context_size {
            return fail(format!(
                "chunk {} next preview is {next} tokens (limit {})",
                chunk.chunk_id, self.config.context_size
            ));
        }

        if chunk.chunk_index == 0 && !chunk.previous_summary.is_empty() {
            return fail("first chunk must have an empty previous summary".to_string());
        }
        if is_last && !chunk.next_preview.is_empty() {
            return fail("last chunk must have an empty next preview".to_string());
        }

        Ok(())
    }

    /// Greedily packs sentences into groups whose joined token count
    /// honors the primary limit.
    fn pack_sentences(&self, sentences: Vec<String>) -> Vec<Vec<String>> {
        let max = self.config.primary_chunk_size;
        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in sentences {
            let tokens = count_tokens(&sentence);

            if tokens > max {
                // Flush whatever is pending, then give the oversized
                // sentence its own word-split run of groups.
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                    current_tokens = 0;
                }
                for piece in split_oversized(&sentence, max) {
                    groups.push(vec![piece]);
                }
                continue;
            }

            if current_tokens + tokens > max && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_tokens = 0;
            }

            current_tokens += tokens;
            current.push(sentence);
        }

        if !current.is_empty() {
            groups.push(current);
        }

        // The per-sentence sum can undercount the joined text; move
        // trailing sentences forward until every group fits.
        self.rebalance(groups)
    }

    /// Moves trailing sentences of over-budget groups into the next
    /// group until every group's joined text honors the limit.
    fn rebalance(&self, mut groups: Vec<Vec<String>>) -> Vec<Vec<String>> {
        let max = self.config.primary_chunk_size;
        let mut i = 0;
        while i < groups.len() {
            while groups[i].len() > 1 && count_tokens(&groups[i].join(" ")) > max {
                let Some(moved) = groups[i].pop() else {
                    break;
                };
                if i + 1 < groups.len() {
                    groups[i + 1].insert(0, moved);
                } else {
                    groups.push(vec![moved]);
                }
            }
            i += 1;
        }
        groups
    }

    /// Builds [`Chunk`] records from sentence groups, attaching context
    /// excerpts and self-validating each result.
    fn assemble(&self, groups: &[Vec<String>]) -> Result<Vec<Chunk>, ChunkError> {
        let total = groups.len();
        let total_u32 = u32::try_from(total).map_err(|_| ChunkError::InvariantViolation {
            message: format!("chunk count {total} exceeds u32"),
        })?;
        let budget = self.config.context_size;
        let mut chunks = Vec::with_capacity(total);

        for (index, group) in groups.iter().enumerate() {
            let previous_summary = if index == 0 {
                String::new()
            } else {
                groups
                    .get(index - 1)
                    .map_or_else(String::new, |prev| trailing_excerpt(prev, budget))
            };
            let next_preview = groups
                .get(index + 1)
                .map_or_else(String::new, |next| leading_excerpt(next, budget));

            let index_u32 = u32::try_from(index).unwrap_or(u32::MAX);
            let chunk = Chunk {
                chunk_id: make_chunk_id(index_u32, total_u32),
                chunk_index: index_u32,
                total_chunks: total_u32,
                primary_content: group.join(" "),
                previous_summary,
                next_preview,
            };

            self.validate_detailed(&chunk)?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

/// Builds a chunk id of the form `chunk-0003-of-0012-1f9ac2b4`.
///
/// The display index is 1-based; the random suffix keeps ids from
/// different chunking runs globally unique.
#[must_use]
pub fn make_chunk_id(index: u32, total: u32) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("chunk-{:04}-of-{:04}-{suffix}", index + 1, total)
}
