//! Context excerpt generation.
//!
//! Each chunk carries bounded excerpts of its neighbors so the
//! translator sees the surrounding discourse without any chunk
//! depending on another chunk's *output*. Excerpts are cut at sentence
//! boundaries where a whole sentence fits the budget, otherwise at word
//! boundaries, and are always literal suffixes/prefixes of the
//! neighbor's primary content.

use super::tokenizer::count_tokens;

/// Builds the trailing excerpt of a chunk's sentences: as many whole
/// sentences from the end as fit `budget` tokens, or a word-boundary
/// suffix of the final sentence when not even one sentence fits.
///
/// Returns the empty string for a zero budget or empty input.
#[must_use]
pub fn trailing_excerpt(sentences: &[String], budget: usize) -> String {
    if budget == 0 || sentences.is_empty() {
        return String::new();
    }

    let mut taken: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for sentence in sentences.iter().rev() {
        let cost = count_tokens(sentence);
        if used + cost > budget {
            break;
        }
        taken.push(sentence.as_str());
        used += cost;
    }

    if taken.is_empty() {
        if let Some(last) = sentences.last() {
            return trailing_words(last, budget);
        }
        return String::new();
    }

    taken.reverse();
    fit_to_budget(taken.join(" "), budget, Edge::Leading)
}

/// Builds the leading excerpt of a chunk's sentences: mirror of
/// [`trailing_excerpt`].
#[must_use]
pub fn leading_excerpt(sentences: &[String], budget: usize) -> String {
    if budget == 0 || sentences.is_empty() {
        return String::new();
    }

    let mut taken: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for sentence in sentences {
        let cost = count_tokens(sentence);
        if used + cost > budget {
            break;
        }
        taken.push(sentence.as_str());
        used += cost;
    }

    if taken.is_empty() {
        if let Some(first) = sentences.first() {
            return leading_words(first, budget);
        }
        return String::new();
    }

    fit_to_budget(taken.join(" "), budget, Edge::Trailing)
}

/// Which edge of the text may be shaved to honor the budget.
enum Edge {
    /// Drop words from the front (suffix semantics must survive).
    Leading,
    /// Drop words from the back (prefix semantics must survive).
    Trailing,
}

/// Re-counts the joined excerpt and shaves whole words from the
/// permitted edge if the per-sentence sum undercounted.
fn fit_to_budget(mut text: String, budget: usize, edge: Edge) -> String {
    while !text.is_empty() && count_tokens(&text) > budget {
        match edge {
            Edge::Leading => {
                match text.find(char::is_whitespace) {
                    Some(cut) => text = text.split_off(cut).trim_start().to_string(),
                    None => return String::new(),
                }
            }
            Edge::Trailing => {
                match text.rfind(char::is_whitespace) {
                    Some(cut) => {
                        text.truncate(cut);
                        text.truncate(text.trim_end().len());
                    }
                    None => return String::new(),
                }
            }
        }
    }
    text
}

/// Word-boundary suffix of `sentence` within `budget` tokens.
fn trailing_words(sentence: &str, budget: usize) -> String {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut taken: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for word in words.iter().rev() {
        let cost = count_tokens(word);
        if used + cost > budget {
            break;
        }
        taken.push(word);
        used += cost;
    }
    taken.reverse();
    fit_to_budget(taken.join(" "), budget, Edge::Leading)
}

/// Word-boundary prefix of `sentence` within `budget` tokens.
fn leading_words(sentence: &str, budget: usize) -> String {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut taken: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for word in &words {
        let cost = count_tokens(word);
        if used + cost > budget {
            break;
        }
        taken.push(word);
        used += cost;
    }
    fit_to_budget(taken.join(" "), budget, Edge::Trailing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_trailing_takes_whole_sentences_from_end() {
        let s = sentences(&["Alpha one.", "Beta two.", "Gamma three."]);
        let excerpt = trailing_excerpt(&s, 1000);
        assert_eq!(excerpt, "Alpha one. Beta two. Gamma three.");
    }

    #[test]
    fn test_leading_takes_whole_sentences_from_start() {
        let s = sentences(&["Alpha one.", "Beta two.", "Gamma three."]);
        let excerpt = leading_excerpt(&s, 1000);
        assert_eq!(excerpt, "Alpha one. Beta two. Gamma three.");
    }

    #[test]
    fn test_trailing_respects_budget() {
        let s = sentences(&[
            "The first sentence has several words in it.",
            "Second sentence here.",
            "Third.",
        ]);
        let excerpt = trailing_excerpt(&s, 8);
        assert!(count_tokens(&excerpt) <= 8);
        assert!(!excerpt.is_empty());
        // Must be a literal suffix of the joined primary content.
        let primary = s.join(" ");
        assert!(primary.ends_with(&excerpt));
    }

    #[test]
    fn test_leading_respects_budget() {
        let s = sentences(&[
            "The first sentence has several words in it.",
            "Second sentence here.",
        ]);
        let excerpt = leading_excerpt(&s, 8);
        assert!(count_tokens(&excerpt) <= 8);
        assert!(!excerpt.is_empty());
        let primary = s.join(" ");
        assert!(primary.starts_with(&excerpt));
    }

    #[test]
    fn test_word_fallback_when_no_sentence_fits() {
        let long = (0..50).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let s = vec![format!("{long}.")];
        let trailing = trailing_excerpt(&s, 10);
        assert!(count_tokens(&trailing) <= 10);
        assert!(!trailing.is_empty());
        assert!(s[0].ends_with(&trailing));

        let leading = leading_excerpt(&s, 10);
        assert!(count_tokens(&leading) <= 10);
        assert!(!leading.is_empty());
        assert!(s[0].starts_with(&leading));
    }

    #[test]
    fn test_zero_budget_and_empty_input() {
        let s = sentences(&["Something."]);
        assert_eq!(trailing_excerpt(&s, 0), "");
        assert_eq!(leading_excerpt(&s, 0), "");
        assert_eq!(trailing_excerpt(&[], 100), "");
        assert_eq!(leading_excerpt(&[], 100), "");
    }
}
