//! Line-pattern recovery for headers the strict codec rejects.
//!
//! Nested blocks (`key_quotes`, `stance`) are bounded by the field that follows
//! them in canonical order; headers with reordered fields recover less. A
//! recovered document is rewritten in canonical form, so each file passes
//! through here at most once.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::frontmatter::{line_spans, parse_day, parse_document, render_document, split_document};
use crate::{Article, KeyQuote, ParseError, Stance};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("no title could be extracted from the header")]
    MissingTitle,
}

const SCALAR_FIELDS: [&str; 7] = [
    "title",
    "author",
    "author_id",
    "url",
    "published",
    "fetched",
    "evolution_note",
];

/// Fields that may follow `key_quotes`, tried in order.
const KEY_QUOTES_SUCCESSORS: [&str; 2] = ["\nstance:", "\nevolution_note:"];
const STANCE_SUCCESSORS: [&str; 1] = ["\nevolution_note:"];

static SCALAR_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SCALAR_FIELDS
        .iter()
        .map(|field| {
            let pattern = format!(r"(?m)^{field}:[ \t]*(.+?)[ \t\r]*$");
            (*field, Regex::new(&pattern).unwrap())
        })
        .collect()
});

static RE_TOPICS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^topics:[ \t]*\[(.+?)\]").unwrap());

static RE_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^tags:[ \t]*\[(.+?)\]").unwrap());

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

fn capture_scalar(header: &str, field: &str) -> Option<String> {
    let (_, re) = SCALAR_PATTERNS.iter().find(|(name, _)| *name == field)?;
    let value = unquote(re.captures(header)?.get(1)?.as_str());
    (!value.is_empty()).then(|| value.to_string())
}

fn capture_inline_list(header: &str, re: &Regex) -> Vec<String> {
    let Some(inner) = re.captures(header).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    inner
        .as_str()
        .split(',')
        .map(unquote)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Slice from `start_marker` up to the first successor marker found after it.
fn bounded_region<'a>(header: &'a str, start_marker: &str, successors: &[&str]) -> Option<&'a str> {
    let start = header.find(start_marker)?;
    let end = successors
        .iter()
        .find_map(|marker| header[start..].find(marker).map(|offset| start + offset))
        .unwrap_or(header.len());
    Some(&header[start..end])
}

/// `- key: value` or `key: value`, returning the value.
fn sub_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let line = line.strip_prefix("- ").unwrap_or(line);
    line.strip_prefix(key)?.strip_prefix(':').map(unquote)
}

#[derive(Debug, Default)]
struct OpenQuote {
    text: String,
    context: Option<String>,
}

fn recover_key_quotes(header: &str) -> Vec<KeyQuote> {
    let Some(region) = bounded_region(header, "key_quotes:", &KEY_QUOTES_SUCCESSORS) else {
        return Vec::new();
    };

    let mut closed: Vec<OpenQuote> = Vec::new();
    let mut current: Option<OpenQuote> = None;
    for raw in region.lines() {
        let line = raw.trim();
        if let Some(text) = sub_key_value(line, "text") {
            closed.extend(current.take());
            current = Some(OpenQuote {
                text: text.to_string(),
                context: None,
            });
        } else if let Some(context) = sub_key_value(line, "context") {
            if let Some(open) = current.as_mut() {
                open.context = Some(context.to_string());
            }
        } else if let Some(open) = current.as_mut() {
            if line.is_empty() || line.starts_with('-') || line.starts_with("key_quotes") {
                continue;
            }
            let target = open.context.as_mut().unwrap_or(&mut open.text);
            target.push(' ');
            target.push_str(unquote(line));
        }
    }
    closed.extend(current);

    closed
        .into_iter()
        .filter_map(|quote| {
            let context = quote.context?;
            if quote.text.is_empty() || context.is_empty() {
                return None;
            }
            Some(KeyQuote {
                text: quote.text,
                context,
            })
        })
        .collect()
}

fn recover_stance(header: &str) -> BTreeMap<String, Stance> {
    let Some(region) = bounded_region(header, "\nstance:", &STANCE_SUCCESSORS) else {
        return BTreeMap::new();
    };
    region
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(':') && *line != "stance:")
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            let [key, value] = parts.as_slice() else {
                return None;
            };
            let stance = Stance::parse(value.trim())?;
            Some((key.trim().to_string(), stance))
        })
        .collect()
}

/// Rebuild an article from a header block the strict codec rejected.
pub fn recover_header(header: &str) -> Result<Article, RecoveryError> {
    let title = capture_scalar(header, "title").ok_or(RecoveryError::MissingTitle)?;
    Ok(Article {
        title,
        author: capture_scalar(header, "author").unwrap_or_default(),
        author_id: capture_scalar(header, "author_id").unwrap_or_default(),
        url: capture_scalar(header, "url").unwrap_or_default(),
        published: capture_scalar(header, "published").and_then(|s| parse_day(&s)),
        fetched: capture_scalar(header, "fetched").and_then(|s| parse_day(&s)),
        topics: capture_inline_list(header, &RE_TOPICS),
        key_quotes: recover_key_quotes(header),
        stance: recover_stance(header),
        evolution_note: capture_scalar(header, "evolution_note").unwrap_or_default(),
        tags: capture_inline_list(header, &RE_TAGS),
        content: String::new(),
    }
    .bounded())
}

/// Header and body for recovery. An unclosed header ends at the first blank line.
pub fn header_for_recovery(text: &str) -> Option<(&str, &str)> {
    match split_document(text) {
        Ok(parts) => Some((parts.header, parts.body)),
        Err(ParseError::MissingOpeningDelimiter) => None,
        Err(_) => {
            let mut spans = line_spans(text);
            let (_, first_end) = spans.next()?;
            let header_start = (first_end + 1).min(text.len());
            for (start, end) in spans {
                if text[start..end].trim().is_empty() {
                    let body_start = (end + 1).min(text.len());
                    return Some((&text[header_start..start], &text[body_start..]));
                }
            }
            Some((&text[header_start..], ""))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The strict codec accepts the document; nothing to rewrite.
    AlreadyValid(Article),
    /// Recovery succeeded; `document` is the canonical rewrite.
    Repaired { article: Article, document: String },
    /// The document has no header block at all.
    NoHeader,
    Unrecoverable(RecoveryError),
}

/// Strict parse first, recovery second. Valid documents are never rewritten.
pub fn repair_document(text: &str) -> Result<RepairOutcome, serde_yaml::Error> {
    if let Ok(article) = parse_document(text) {
        return Ok(RepairOutcome::AlreadyValid(article));
    }
    let Some((header, body)) = header_for_recovery(text) else {
        return Ok(RepairOutcome::NoHeader);
    };
    let mut article = match recover_header(header) {
        Ok(article) => article,
        Err(err) => return Ok(RepairOutcome::Unrecoverable(err)),
    };
    article.content = body.to_string();
    let document = render_document(&article)?;
    Ok(RepairOutcome::Repaired { article, document })
}
