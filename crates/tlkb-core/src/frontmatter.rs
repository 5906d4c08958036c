//! Strict codec for the `---` delimited header that opens every article file.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::{Article, KeyQuote, Stance, MAX_KEY_QUOTES, UNTITLED};

pub const DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("document does not open with a `---` header line")]
    MissingOpeningDelimiter,
    #[error("header block is never closed by a `---` line")]
    MissingClosingDelimiter,
    #[error("header is not valid yaml: {0}")]
    Yaml(String),
    #[error("header is not a field mapping")]
    NotAMapping,
}

/// Raw header text (between the delimiter lines) and the body that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentParts<'a> {
    pub header: &'a str,
    pub body: &'a str,
}

/// Byte spans `(start, end)` of each line, `end` excluding the newline.
pub(crate) fn line_spans(text: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let mut start = 0usize;
    std::iter::from_fn(move || {
        if start > text.len() {
            return None;
        }
        let span = match text[start..].find('\n') {
            Some(offset) => (start, start + offset),
            None => (start, text.len()),
        };
        start = span.1 + 1;
        Some(span)
    })
}

pub fn split_document(text: &str) -> Result<DocumentParts<'_>, ParseError> {
    let mut spans = line_spans(text);
    let Some((first_start, first_end)) = spans.next() else {
        return Err(ParseError::MissingOpeningDelimiter);
    };
    if text[first_start..first_end].trim() != DELIMITER {
        return Err(ParseError::MissingOpeningDelimiter);
    }
    let header_start = (first_end + 1).min(text.len());

    for (start, end) in spans {
        if text[start..end].trim() == DELIMITER {
            let body_start = (end + 1).min(text.len());
            let body = &text[body_start..];
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Ok(DocumentParts {
                header: &text[header_start..start],
                body,
            });
        }
    }
    Err(ParseError::MissingClosingDelimiter)
}

pub fn parse_document(text: &str) -> Result<Article, ParseError> {
    let parts = split_document(text)?;
    let value: Value =
        serde_yaml::from_str(parts.header).map_err(|e| ParseError::Yaml(e.to_string()))?;
    let Value::Mapping(map) = value else {
        return Err(ParseError::NotAMapping);
    };

    let title = scalar_string(map.get("title"))
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    Ok(Article {
        title,
        author: scalar_string(map.get("author")).unwrap_or_default(),
        author_id: scalar_string(map.get("author_id")).unwrap_or_default(),
        url: scalar_string(map.get("url")).unwrap_or_default(),
        published: scalar_string(map.get("published")).and_then(|s| parse_day(&s)),
        fetched: scalar_string(map.get("fetched")).and_then(|s| parse_day(&s)),
        topics: string_list(map.get("topics")),
        key_quotes: key_quotes_from(map.get("key_quotes"), MAX_KEY_QUOTES),
        stance: stance_from(map.get("stance")),
        evolution_note: scalar_string(map.get("evolution_note")).unwrap_or_default(),
        tags: string_list(map.get("tags")),
        content: parts.body.to_string(),
    }
    .bounded())
}

#[derive(Serialize)]
struct HeaderOut<'a> {
    title: &'a str,
    author: &'a str,
    author_id: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    published: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetched: Option<NaiveDate>,
    topics: &'a [String],
    key_quotes: &'a [KeyQuote],
    stance: &'a BTreeMap<String, Stance>,
    evolution_note: &'a str,
    tags: &'a [String],
}

/// Canonical form: header fields in fixed order, a blank line, then the body.
pub fn render_document(article: &Article) -> Result<String, serde_yaml::Error> {
    let header = serde_yaml::to_string(&HeaderOut {
        title: &article.title,
        author: &article.author,
        author_id: &article.author_id,
        url: &article.url,
        published: article.published,
        fetched: article.fetched,
        topics: &article.topics,
        key_quotes: &article.key_quotes,
        stance: &article.stance,
        evolution_note: &article.evolution_note,
        tags: &article.tags,
    })?;
    Ok(format!("{DELIMITER}\n{header}{DELIMITER}\n\n{}", article.content))
}

pub(crate) fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub(crate) fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| scalar_string(Some(item)))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Takes at most `limit` entries, then drops any lacking `text` or `context`.
pub(crate) fn key_quotes_from(value: Option<&Value>, limit: usize) -> Vec<KeyQuote> {
    let Some(Value::Sequence(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .take(limit)
        .filter_map(|item| {
            let map = item.as_mapping()?;
            let text = scalar_string(map.get("text"))?.trim().to_string();
            let context = scalar_string(map.get("context"))?.trim().to_string();
            if text.is_empty() || context.is_empty() {
                return None;
            }
            Some(KeyQuote { text, context })
        })
        .collect()
}

pub(crate) fn stance_from(value: Option<&Value>) -> BTreeMap<String, Stance> {
    let Some(Value::Mapping(map)) = value else {
        return BTreeMap::new();
    };
    stance_from_mapping(map)
}

fn stance_from_mapping(map: &Mapping) -> BTreeMap<String, Stance> {
    map.iter()
        .filter_map(|(key, value)| {
            let key = scalar_string(Some(key))?;
            let stance = value.as_str().and_then(Stance::parse)?;
            Some((key, stance))
        })
        .collect()
}
