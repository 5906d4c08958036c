//! Core article model, front matter codec and identity helpers for TLKB.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

mod frontmatter;
mod identity;
pub mod recovery;
mod validate;

pub use frontmatter::{parse_document, render_document, split_document, DocumentParts, ParseError};
pub use identity::{article_file_name, identity_token, slugify, IDENTITY_TOKEN_LEN, SLUG_MAX_CHARS};
pub use recovery::{repair_document, RecoveryError, RepairOutcome};
pub use validate::{normalize_tag, validate_metadata};

pub const CRATE_NAME: &str = "tlkb-core";

pub const UNTITLED: &str = "Untitled";
pub const MAX_TOPICS: usize = 5;
pub const MAX_KEY_QUOTES: usize = 4;
pub const MAX_TAGS: usize = 6;
pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub const DEFAULT_TOPIC: &str = "Uncategorized";
pub const DEFAULT_EVOLUTION_NOTE: &str = "Content requires further analysis";
pub const PENDING_EVOLUTION_NOTE: &str = "Initial analysis pending";

/// Author position on a tool or concept mentioned in an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Positive,
    Neutral,
    Negative,
    Critical,
}

impl Stance {
    pub const ALL: [Stance; 4] = [
        Stance::Positive,
        Stance::Neutral,
        Stance::Negative,
        Stance::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Positive => "positive",
            Stance::Neutral => "neutral",
            Stance::Negative => "negative",
            Stance::Critical => "critical",
        }
    }

    /// Exact match only; anything else is rejected rather than coerced.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diátaxis documentation-purpose category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DiataxisType {
    #[serde(rename = "tutorial")]
    Tutorial,
    #[serde(rename = "how-to")]
    HowTo,
    #[serde(rename = "reference")]
    Reference,
    #[serde(rename = "explanation")]
    #[default]
    Explanation,
}

impl DiataxisType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiataxisType::Tutorial => "tutorial",
            DiataxisType::HowTo => "how-to",
            DiataxisType::Reference => "reference",
            DiataxisType::Explanation => "explanation",
        }
    }

    /// Map a free-form classifier reply onto a category, defaulting to `Explanation`.
    pub fn normalize(response: &str) -> Self {
        let cleaned = response
            .trim()
            .trim_matches(|c: char| matches!(c, '.' | '"' | '\'' | '`'))
            .trim()
            .to_lowercase();
        match cleaned.as_str() {
            "tutorial" => DiataxisType::Tutorial,
            "how-to" | "howto" | "how to" | "how-to guide" => DiataxisType::HowTo,
            "reference" => DiataxisType::Reference,
            _ => DiataxisType::Explanation,
        }
    }
}

impl fmt::Display for DiataxisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyQuote {
    pub text: String,
    pub context: String,
}

/// One ingested article: the front matter fields plus the markdown body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Article {
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub url: String,
    pub published: Option<NaiveDate>,
    pub fetched: Option<NaiveDate>,
    pub topics: Vec<String>,
    pub key_quotes: Vec<KeyQuote>,
    pub stance: BTreeMap<String, Stance>,
    pub evolution_note: String,
    pub tags: Vec<String>,
    pub content: String,
}

impl Article {
    pub fn identity_token(&self) -> String {
        identity_token(&self.url)
    }

    /// File name inside the author partition; undated articles use `fallback_date`.
    pub fn file_name(&self, fallback_date: NaiveDate) -> String {
        let date = self.published.or(self.fetched).unwrap_or(fallback_date);
        article_file_name(date, &self.title, &self.url)
    }

    pub fn metadata(&self) -> ArticleMetadata {
        ArticleMetadata {
            topics: self.topics.clone(),
            key_quotes: self.key_quotes.clone(),
            stance: self.stance.clone(),
            evolution_note: self.evolution_note.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Truncate and de-duplicate collections and normalize tags. Empty
    /// fields stay empty.
    pub fn bounded(mut self) -> Self {
        self.topics = bounded_topics(std::mem::take(&mut self.topics));
        self.key_quotes.truncate(MAX_KEY_QUOTES);
        self.tags = bounded_tags(&self.tags);
        self
    }

    pub fn apply_metadata(&mut self, metadata: ArticleMetadata) {
        self.topics = metadata.topics;
        self.key_quotes = metadata.key_quotes;
        self.stance = metadata.stance;
        self.evolution_note = metadata.evolution_note;
        self.tags = metadata.tags;
    }
}

/// AI-derived fields merged into an article by metadata extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArticleMetadata {
    pub topics: Vec<String>,
    pub key_quotes: Vec<KeyQuote>,
    pub stance: BTreeMap<String, Stance>,
    pub evolution_note: String,
    pub tags: Vec<String>,
}

impl ArticleMetadata {
    /// Substituted whenever extraction fails for any reason.
    pub fn fallback() -> Self {
        Self {
            topics: vec!["AI".to_string(), "Technology".to_string()],
            key_quotes: Vec::new(),
            stance: BTreeMap::new(),
            evolution_note: PENDING_EVOLUTION_NOTE.to_string(),
            tags: vec!["ai".to_string(), "tech".to_string()],
        }
    }

    /// Collection limits and tag normalization only; no defaults.
    pub fn bounded(mut self) -> Self {
        self.topics = bounded_topics(self.topics);
        self.key_quotes.truncate(MAX_KEY_QUOTES);
        self.tags = bounded_tags(&self.tags);
        self
    }

    /// Enforce defaults, bounds and tag normalization. Total; never fails.
    pub fn validated(self) -> Self {
        let mut topics = bounded_topics(self.topics);
        if topics.is_empty() {
            topics.push(DEFAULT_TOPIC.to_string());
        }

        let mut key_quotes = self.key_quotes;
        key_quotes.truncate(MAX_KEY_QUOTES);

        let evolution_note = match self.evolution_note.trim() {
            "" => DEFAULT_EVOLUTION_NOTE.to_string(),
            note => note.to_string(),
        };

        let tags = if self.tags.iter().all(|t| t.trim().is_empty()) {
            bounded_tags(&topics[..topics.len().min(3)])
        } else {
            bounded_tags(&self.tags)
        };

        Self {
            topics,
            key_quotes,
            stance: self.stance,
            evolution_note,
            tags,
        }
    }
}

fn bounded_topics(raw: Vec<String>) -> Vec<String> {
    let mut topics: Vec<String> = Vec::with_capacity(raw.len().min(MAX_TOPICS));
    for topic in raw {
        let topic = topic.trim().to_string();
        if !topic.is_empty() && !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics.truncate(MAX_TOPICS);
    topics
}

fn bounded_tags(raw: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.iter().filter(|t| !t.trim().is_empty()).map(|t| normalize_tag(t)) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}
