//! Shared token counting.
//!
//! One counter defines the token unit for every size limit in the
//! pipeline: chunk packing, context excerpt budgets, and the worker's
//! pre-call quota estimate all agree because they all call
//! [`count_tokens`]. The counter approximates the remote model's
//! tokenizer with `cl100k_base`; the context-excerpt headroom absorbs
//! the small divergence.

use once_cell::sync::Lazy;
use tiktoken_rs::{CoreBPE, cl100k_base};

/// Process-wide BPE encoder. `None` when the encoder tables cannot be
/// constructed; counting then falls back to a character heuristic.
static ENCODER: Lazy<Option<CoreBPE>> = Lazy::new(|| cl100k_base().ok());

/// Counts tokens in `text` using the shared encoder.
///
/// Falls back to a `ceil(chars / 4)` heuristic when the encoder is
/// unavailable, which overestimates for prose and therefore keeps the
/// packing limits safe.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    ENCODER.as_ref().map_or_else(
        || text.chars().count().div_ceil(4),
        |bpe| bpe.encode_with_special_tokens(text).len(),
    )
}
