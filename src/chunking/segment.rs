//! Sentence segmentation and word-boundary splitting.
//!
//! Sentences are the atoms of chunk packing: the chunker never cuts a
//! sentence it can complete. Segmentation splits on terminator
//! characters while tolerating whitespace runs, paragraph breaks, and
//! full-width Unicode punctuation. Each emitted sentence has its
//! internal whitespace collapsed to single spaces, so re-joining
//! sentences with single spaces reproduces the document's normalized
//! text stream.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use super::tokenizer::count_tokens;

/// Collapses whitespace runs (spaces, tabs, newlines) to single spaces.
static WHITESPACE_RUN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

/// Characters that may trail a terminator and still belong to the
/// sentence (closing quotes and brackets).
const TRAILERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}', '\u{00bb}'];

/// Normalizes whitespace in `text`: runs collapse to one space, edges
/// are trimmed.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RUN.as_ref().map_or_else(
        || text.split_whitespace().collect::<Vec<_>>().join(" "),
        |re| re.replace_all(text.trim(), " ").into_owned(),
    )
}

/// Extends the configured terminator set with full-width counterparts
/// and the horizontal ellipsis.
#[must_use]
pub fn effective_terminators(configured: &[char]) -> Vec<char> {
    let mut set: Vec<char> = configured.to_vec();
    for c in configured {
        let wide = match c {
            '.' => Some('\u{3002}'), // 。
            '!' => Some('\u{ff01}'), // ！
            '?' => Some('\u{ff1f}'), // ？
            _ => None,
        };
        if let Some(w) = wide
            && !set.contains(&w)
        {
            set.push(w);
        }
    }
    if !set.contains(&'\u{2026}') {
        set.push('\u{2026}'); // …
    }
    set
}

/// Splits `text` into whitespace-normalized sentences.
///
/// A sentence boundary is a run of terminator characters (plus any
/// closing quotes or brackets) followed by whitespace or end of input.
/// Trailing text without a terminator is emitted as a final sentence.
/// Whitespace-only input yields no sentences.
#[must_use]
pub fn split_sentences(text: &str, terminators: &[char]) -> Vec<String> {
    let terms = effective_terminators(terminators);
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);

        if !terms.contains(&c) {
            continue;
        }

        // Consume the rest of the terminator run ("?!", "...") and any
        // closing quotes or brackets.
        while let Some(&next) = chars.peek() {
            if terms.contains(&next) || TRAILERS.contains(&next) {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }

        // Boundary only when followed by whitespace or end of input;
        // this keeps decimals like "3.5" and abbreviations mid-token
        // intact.
        let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            let sentence = normalize_whitespace(&current);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let tail = normalize_whitespace(&current);
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Splits an oversized sentence into pieces of at most `max_tokens`
/// each, cutting only at word boundaries.
///
/// Pieces are balanced: the sentence is divided into
/// `ceil(tokens / max_tokens)` parts of roughly equal token weight
/// rather than `max`-sized parts followed by a tiny remainder. Word
/// boundaries come from Unicode segmentation, so text without spaces
/// (CJK) still splits. Concatenating the trimmed pieces with single
/// spaces preserves the sentence's normalized content.
#[must_use]
pub fn split_oversized(sentence: &str, max_tokens: usize) -> Vec<String> {
    let total = count_tokens(sentence);
    if total <= max_tokens {
        return vec![sentence.to_string()];
    }

    let parts = total.div_ceil(max_tokens.max(1));
    let budget = total.div_ceil(parts).min(max_tokens);

    let mut pieces: Vec<String> = Vec::with_capacity(parts);
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for segment in sentence.split_word_bounds() {
        let seg_tokens = count_tokens(segment);
        if current_tokens + seg_tokens > budget && !current.trim().is_empty() {
            push_piece(&mut pieces, &mut current, max_tokens);
            current_tokens = 0;
        }
        current.push_str(segment);
        current_tokens += seg_tokens;
    }
    push_piece(&mut pieces, &mut current, max_tokens);

    pieces
}

/// Flushes `current` into `pieces`, re-counting the joined text and
/// shaving trailing words into a follow-on piece if the additive
/// estimate undershot.
fn push_piece(pieces: &mut Vec<String>, current: &mut String, max_tokens: usize) {
    let mut piece = normalize_whitespace(current);
    current.clear();
    if piece.is_empty() {
        return;
    }

    let mut remainder = String::new();
    while count_tokens(&piece) > max_tokens {
        let Some(cut) = piece.rfind(char::is_whitespace) else {
            // A single unsplittable word; emit as-is.
            break;
        };
        let tail = piece.split_off(cut);
        let word = tail.trim();
        remainder = if remainder.is_empty() {
            word.to_string()
        } else {
            format!("{word} {remainder}")
        };
    }
    pieces.push(piece);

    if !remainder.is_empty() {
        push_piece(pieces, &mut remainder, max_tokens);
    }
}
