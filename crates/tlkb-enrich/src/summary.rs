use tlkb_core::KeyQuote;

use crate::enricher::truncate_chars;

pub const SUMMARY_QUOTE_CHARS: usize = 200;
pub const SUMMARY_PARAGRAPH_CHARS: usize = 300;
pub const SUMMARY_MAX_CHARS: usize = 500;
const MIN_PARAGRAPH_CHARS: usize = 50;

/// Extractive summary: the first quote plus the first substantial paragraph
/// that is not a heading or a bold metadata line. Falls back to the title.
pub fn summarize(title: &str, content: &str, key_quotes: &[KeyQuote]) -> String {
    let mut parts: Vec<&str> = Vec::new();

    if let Some(quote) = key_quotes.first().filter(|q| !q.text.is_empty()) {
        parts.push(truncate_chars(&quote.text, SUMMARY_QUOTE_CHARS).0);
    }

    let paragraph = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .find(|p| !p.starts_with('#') && !p.starts_with("**") && p.chars().count() > MIN_PARAGRAPH_CHARS);
    if let Some(paragraph) = paragraph {
        parts.push(truncate_chars(paragraph, SUMMARY_PARAGRAPH_CHARS).0);
    }

    if parts.is_empty() {
        return title.to_string();
    }
    let joined = parts.join(" ");
    truncate_chars(&joined, SUMMARY_MAX_CHARS).0.to_string()
}
