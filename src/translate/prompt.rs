//! Prompt construction for the translation endpoint.
//!
//! The template is deterministic: the same inputs always build the
//! same prompt string. Context and source text are fenced with
//! explicit markers so the model can tell reference material from the
//! text it must translate.

use crate::job::Tone;

use super::client::{TranslateOptions, TranslationContext};

/// Opening marker of the context block.
pub const CONTEXT_START: &str = "=== PRECEDING CONTEXT (reference only, do not translate) ===";
/// Closing marker of the context block.
pub const CONTEXT_END: &str = "=== END CONTEXT ===";
/// Opening marker of the source block.
pub const SOURCE_START: &str = "=== TEXT TO TRANSLATE ===";
/// Closing marker of the source block.
pub const SOURCE_END: &str = "=== END TEXT ===";

const fn tone_directive(tone: Tone) -> &'static str {
    match tone {
        Tone::Formal => "Use a formal register appropriate for professional documents.",
        Tone::Informal => "Use an informal, conversational register.",
        Tone::Neutral => "Use a neutral register, neither stiff nor casual.",
    }
}

/// Builds the full prompt for one chunk.
#[must_use]
pub fn build_translation_prompt(
    text: &str,
    options: &TranslateOptions,
    context: &TranslationContext,
) -> String {
    let mut prompt = String::with_capacity(text.len() + 1024);

    prompt.push_str(
        "You are a professional translator producing publication-quality translations.\n",
    );
    prompt.push_str(&format!(
        "Translate the text below into {}.\n",
        options.target_language.display_name()
    ));
    prompt.push_str(tone_directive(options.tone));
    prompt.push('\n');

    if options.preserve_formatting {
        prompt.push_str(
            "Preserve the original formatting: keep paragraph breaks, lists, and emphasis.\n",
        );
    } else {
        prompt.push_str("Use natural paragraph flow for the target language.\n");
    }

    if let Some(extra) = options
        .additional_instructions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        prompt.push_str("Additional instructions: ");
        prompt.push_str(extra.trim());
        prompt.push('\n');
    }

    let context_text = context
        .previous_chunks
        .iter()
        .filter(|c| !c.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if !context_text.is_empty() {
        prompt.push('\n');
        prompt.push_str(CONTEXT_START);
        prompt.push('\n');
        prompt.push_str(&context_text);
        prompt.push('\n');
        prompt.push_str(CONTEXT_END);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(SOURCE_START);
    prompt.push('\n');
    prompt.push_str(text);
    prompt.push('\n');
    prompt.push_str(SOURCE_END);
    prompt.push('\n');
    prompt.push_str("Return only the translated text, with no commentary or markers.\n");

    prompt
}
