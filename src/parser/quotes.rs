//! Dialogue quote extraction
//!
//! On these boards spoken dialogue is written in bold or in a coloured inline
//! element and opens with a quotation mark, while narrative prose is
//! italicised. Only the dialogue of one character's own posts is collected.

use super::thread::{post_author, post_body, post_containers};
use super::{collapse_whitespace, element_text, select_all};
use crate::config::QuoteConfig;
use scraper::{ElementRef, Html};
use serde::Serialize;
use std::collections::HashSet;

/// Inline elements that may carry dialogue
const CANDIDATES: &str = "b, strong, span, font";

/// Bold markup inside a colour wrapper is the dialogue; the wrapper is not
const BOLD: &str = "b, strong";

const OPENING_MARKS: &[char] = &['"', '\'', '\u{201C}', '\u{2018}', '\u{00AB}'];
const CLOSING_MARKS: &[char] = &['"', '\'', '\u{201D}', '\u{2019}', '\u{00BB}'];

/// Word-count and length filters applied to every accepted quote
#[derive(Debug, Clone, Copy)]
pub struct QuoteRules {
    pub min_words: usize,
    pub max_length: usize,
}

impl From<&QuoteConfig> for QuoteRules {
    fn from(config: &QuoteConfig) -> Self {
        Self {
            min_words: config.min_words,
            max_length: config.max_length,
        }
    }
}

impl Default for QuoteRules {
    fn default() -> Self {
        Self::from(&QuoteConfig::default())
    }
}

/// A line of dialogue, stripped of its quotation marks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedQuote {
    pub text: String,
}

/// Extracts the dialogue a character speaks on one thread page
///
/// # Arguments
///
/// * `html` - The thread page
/// * `character_name` - Display name of the character (case-insensitive exact match)
/// * `rules` - Word-count and length filters
///
/// # Returns
///
/// Quotes in page order. A text appears at most once per post, and nested
/// styled wrappers around the same dialogue yield a single quote.
pub fn extract_quotes(html: &str, character_name: &str, rules: &QuoteRules) -> Vec<ExtractedQuote> {
    let document = Html::parse_document(html);
    let wanted = character_name.trim().to_lowercase();
    let mut quotes = Vec::new();

    for post in post_containers(document.root_element()) {
        let Some(author) = post_author(post) else {
            continue;
        };
        if author.name.to_lowercase() != wanted {
            continue;
        }
        let Some(body) = post_body(post) else {
            continue;
        };

        let mut accepted: Vec<ElementRef<'_>> = Vec::new();
        let mut texts: HashSet<String> = HashSet::new();

        for candidate in select_all(body, CANDIDATES) {
            if has_accepted_ancestor(candidate, body, &accepted) || wraps_bold(candidate) {
                continue;
            }

            let raw = element_text(candidate);
            if !raw.starts_with(OPENING_MARKS) {
                continue;
            }
            if is_italic(candidate, body, &raw) {
                continue;
            }

            let Some(text) = clean_quote(&raw, rules) else {
                continue;
            };

            accepted.push(candidate);
            if texts.insert(text.clone()) {
                quotes.push(ExtractedQuote { text });
            }
        }
    }

    quotes
}

/// Strips quotation marks and applies the word-count and length rules
fn clean_quote(raw: &str, rules: &QuoteRules) -> Option<String> {
    let stripped = raw
        .trim_start_matches(OPENING_MARKS)
        .trim_end_matches(CLOSING_MARKS);
    let cleaned = collapse_whitespace(stripped);

    if cleaned.split_whitespace().count() < rules.min_words {
        return None;
    }

    Some(truncate_at_word(&cleaned, rules.max_length))
}

/// Caps text at `max_chars`, cutting back to the last whole word and adding an ellipsis
fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars).collect();
    let cut = match head.rfind(' ') {
        Some(pos) => head[..pos].trim_end(),
        None => head.as_str(),
    };
    format!("{}...", cut)
}

fn wraps_bold(candidate: ElementRef<'_>) -> bool {
    matches!(candidate.value().name(), "span" | "font")
        && !select_all(candidate, BOLD).is_empty()
}

fn has_accepted_ancestor(
    candidate: ElementRef<'_>,
    body: ElementRef<'_>,
    accepted: &[ElementRef<'_>],
) -> bool {
    if accepted.is_empty() {
        return false;
    }
    candidate
        .ancestors()
        .take_while(|node| node.id() != body.id())
        .any(|node| accepted.iter().any(|el| el.id() == node.id()))
}

/// True when the candidate sits inside, carries, or wraps italic styling
fn is_italic(candidate: ElementRef<'_>, body: ElementRef<'_>, text: &str) -> bool {
    if has_italic_style(candidate) {
        return true;
    }

    let inside_italic = candidate
        .ancestors()
        .take_while(|node| node.id() != body.id())
        .filter_map(ElementRef::wrap)
        .any(|el| is_emphasis(el) || has_italic_style(el));
    if inside_italic {
        return true;
    }

    select_all(candidate, "i, em")
        .into_iter()
        .any(|inner| element_text(inner) == text)
}

fn is_emphasis(element: ElementRef<'_>) -> bool {
    matches!(element.value().name(), "i" | "em")
}

fn has_italic_style(element: ElementRef<'_>) -> bool {
    element
        .value()
        .attr("style")
        .map(|style| style.to_ascii_lowercase().contains("italic"))
        .unwrap_or(false)
}
