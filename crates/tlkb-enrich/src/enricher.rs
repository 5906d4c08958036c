use std::sync::Arc;

use serde_yaml::Value;
use tlkb_core::{validate_metadata, Article, ArticleMetadata, DiataxisType, KeyQuote, EMBEDDING_DIMENSIONS};
use tracing::{debug, warn};

use crate::llm::{Embedder, TextGenerator};
use crate::prompts::{classify_request, metadata_request};

pub const METADATA_CONTENT_LIMIT: usize = 6000;
pub const CLASSIFY_CONTENT_LIMIT: usize = 3000;
pub const EMBEDDING_CHAR_BUDGET: usize = 32_000;
pub const EMBEDDING_QUOTE_LIMIT: usize = 3;

const TRUNCATION_MARKER: &str = "\n\n[Content truncated...]";

/// First `max_chars` characters of `text`, and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match truncate_chars(text, max_chars) {
        (head, true) => format!("{head}{TRUNCATION_MARKER}"),
        (whole, false) => whole.to_string(),
    }
}

/// The YAML payload of a model reply, without surrounding code fences.
pub fn strip_code_fences(reply: &str) -> &str {
    let reply = reply.trim();
    let inner = if let Some((_, rest)) = reply.split_once("```yaml") {
        rest.split("```").next().unwrap_or(rest)
    } else if reply.contains("```") {
        reply.split("```").nth(1).unwrap_or(reply)
    } else {
        reply
    };
    inner.trim()
}

/// Fields combined into the text sent for embedding.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingInput<'a> {
    pub title: &'a str,
    pub summary: Option<&'a str>,
    pub topics: &'a [String],
    pub key_quotes: &'a [KeyQuote],
    pub content: &'a str,
}

/// `Title:`, `Summary:`, `Topics:`, `Key quotes:` and `Content:` parts joined
/// by blank lines. Over budget, the content part is cut first.
pub fn build_embedding_text(input: &EmbeddingInput<'_>) -> String {
    let mut parts = vec![format!("Title: {}", input.title)];
    if let Some(summary) = input.summary.filter(|s| !s.is_empty()) {
        parts.push(format!("Summary: {summary}"));
    }
    if !input.topics.is_empty() {
        parts.push(format!("Topics: {}", input.topics.join(", ")));
    }
    if !input.key_quotes.is_empty() {
        let quotes = input
            .key_quotes
            .iter()
            .take(EMBEDDING_QUOTE_LIMIT)
            .map(|q| q.text.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        parts.push(format!("Key quotes: {quotes}"));
    }
    let prefix = parts.join("\n\n");

    let overhead = prefix.chars().count() + "\n\nContent: ".chars().count();
    let content_budget = EMBEDDING_CHAR_BUDGET.saturating_sub(overhead);
    let (content, _) = truncate_chars(input.content, content_budget);
    let combined = format!("{prefix}\n\nContent: {content}");
    match truncate_chars(&combined, EMBEDDING_CHAR_BUDGET) {
        (head, true) => head.to_string(),
        (_, false) => combined,
    }
}

/// Sequences metadata extraction, classification and embedding calls. Every
/// failure degrades to a fixed fallback rather than an error.
#[derive(Clone)]
pub struct Enricher {
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    taxonomy: Vec<String>,
}

impl Enricher {
    pub fn new(generator: Arc<dyn TextGenerator>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            generator,
            embedder,
            taxonomy: Vec::new(),
        }
    }

    pub fn with_taxonomy(mut self, taxonomy: Vec<String>) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }

    pub async fn extract_metadata(&self, article: &Article) -> ArticleMetadata {
        let content = truncate_with_marker(&article.content, METADATA_CONTENT_LIMIT);
        let request = metadata_request(&article.title, &article.author, &article.url, &content, &self.taxonomy);

        let reply = match self.generator.generate(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(url = %article.url, error = %err, "metadata extraction failed");
                return ArticleMetadata::fallback();
            }
        };
        match serde_yaml::from_str::<Value>(strip_code_fences(&reply)) {
            Ok(value @ Value::Mapping(_)) => validate_metadata(&value),
            Ok(_) => {
                warn!(url = %article.url, "metadata reply is not a mapping");
                ArticleMetadata::fallback()
            }
            Err(err) => {
                warn!(url = %article.url, error = %err, "metadata reply is not yaml");
                ArticleMetadata::fallback()
            }
        }
    }

    pub async fn classify(&self, title: &str, content: &str, author: Option<&str>) -> DiataxisType {
        let content = truncate_with_marker(content, CLASSIFY_CONTENT_LIMIT);
        match self.generator.generate(&classify_request(title, author, &content)).await {
            Ok(reply) => {
                let kind = DiataxisType::normalize(&reply);
                debug!(reply = reply.trim(), %kind, "classified");
                kind
            }
            Err(err) => {
                warn!(error = %err, "classification failed");
                DiataxisType::default()
            }
        }
    }

    /// A vector of exactly [`EMBEDDING_DIMENSIONS`] floats, or `None`.
    pub async fn embed_article(&self, input: &EmbeddingInput<'_>) -> Option<Vec<f32>> {
        let text = build_embedding_text(input);
        if text.trim().is_empty() {
            warn!("empty text for embedding");
            return None;
        }
        match self.embedder.embed(&text).await {
            Ok(vector) if vector.len() == EMBEDDING_DIMENSIONS => Some(vector),
            Ok(vector) => {
                warn!(expected = EMBEDDING_DIMENSIONS, actual = vector.len(), "embedding has wrong dimension");
                None
            }
            Err(err) => {
                warn!(error = %err, "embedding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tlkb_core::Stance;

    use super::*;
    use crate::llm::{GenerationRequest, LlmError};

    struct ScriptedGenerator {
        reply: Option<String>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().ok_or(LlmError::EmptyResponse)
        }
    }

    struct FixedEmbedder {
        dims: Option<usize>,
        seen: Mutex<Vec<String>>,
    }

    impl FixedEmbedder {
        fn new(dims: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                dims,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.seen.lock().unwrap().push(text.to_string());
            self.dims.map(|n| vec![0.25; n]).ok_or(LlmError::MissingApiKey)
        }
    }

    fn article(content: &str) -> Article {
        Article {
            title: "Claude Code vs Cursor: My Experience".into(),
            author: "Test Author".into(),
            url: "https://example.com/test".into(),
            content: content.into(),
            ..Article::default()
        }
    }

    #[tokio::test]
    async fn fenced_yaml_reply_is_validated() {
        let generator = ScriptedGenerator::replying(
            "Here you go:\n```yaml\ntopics:\n  - AI Agents\n  - AI Agents\n  - Developer Tools\nstance:\n  claude_code: positive\n  fake_tool: banana\nevolution_note: A paradigm shift.\ntags: [Agent Native]\n```\n",
        );
        let enricher = Enricher::new(generator.clone(), FixedEmbedder::new(None))
            .with_taxonomy(vec!["AI Agents".into()]);

        let meta = enricher.extract_metadata(&article("short")).await;
        assert_eq!(meta.topics, vec!["AI Agents", "Developer Tools"]);
        assert_eq!(meta.stance.len(), 1);
        assert_eq!(meta.stance.get("claude_code"), Some(&Stance::Positive));
        assert_eq!(meta.tags, vec!["agent-native"]);
        assert_eq!(meta.evolution_note, "A paradigm shift.");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].user.contains("Existing topics: AI Agents"));
    }

    #[tokio::test]
    async fn every_failure_mode_yields_the_fixed_fallback() {
        for generator in [
            ScriptedGenerator::failing(),
            ScriptedGenerator::replying("topics: [unclosed"),
            ScriptedGenerator::replying("just prose, no yaml mapping"),
            ScriptedGenerator::replying(""),
        ] {
            let enricher = Enricher::new(generator, FixedEmbedder::new(None));
            assert_eq!(
                enricher.extract_metadata(&article("body")).await,
                ArticleMetadata::fallback()
            );
        }
    }

    #[tokio::test]
    async fn long_content_is_truncated_with_marker() {
        let generator = ScriptedGenerator::replying("topics: [x]");
        let enricher = Enricher::new(generator.clone(), FixedEmbedder::new(None));
        enricher.extract_metadata(&article(&"é".repeat(7000))).await;
        let seen = generator.seen.lock().unwrap();
        assert!(seen[0].user.contains(TRUNCATION_MARKER));
        assert!(!seen[0].user.contains(&"é".repeat(6001)));
    }

    #[tokio::test]
    async fn classification_normalizes_and_defaults() {
        let cases = [
            (ScriptedGenerator::replying("How to"), DiataxisType::HowTo),
            (ScriptedGenerator::replying("Tutorial"), DiataxisType::Tutorial),
            (ScriptedGenerator::replying("a reference, probably"), DiataxisType::Explanation),
            (ScriptedGenerator::failing(), DiataxisType::Explanation),
        ];
        for (generator, expected) in cases {
            let enricher = Enricher::new(generator, FixedEmbedder::new(None));
            assert_eq!(enricher.classify("t", "c", Some("a")).await, expected);
        }
    }

    #[tokio::test]
    async fn embedding_requires_exact_dimension() {
        let input = EmbeddingInput {
            title: "t",
            content: "c",
            ..EmbeddingInput::default()
        };
        let ok = Enricher::new(ScriptedGenerator::failing(), FixedEmbedder::new(Some(EMBEDDING_DIMENSIONS)));
        assert_eq!(ok.embed_article(&input).await.map(|v| v.len()), Some(EMBEDDING_DIMENSIONS));

        let short = Enricher::new(ScriptedGenerator::failing(), FixedEmbedder::new(Some(3)));
        assert!(short.embed_article(&input).await.is_none());

        let broken = Enricher::new(ScriptedGenerator::failing(), FixedEmbedder::new(None));
        assert!(broken.embed_article(&input).await.is_none());
    }

    #[test]
    fn embedding_text_layout() {
        let quotes: Vec<KeyQuote> = (1..=4)
            .map(|i| KeyQuote {
                text: format!("q{i}"),
                context: "c".into(),
            })
            .collect();
        let topics = vec!["A".to_string(), "B".to_string()];
        let text = build_embedding_text(&EmbeddingInput {
            title: "T",
            summary: Some("S"),
            topics: &topics,
            key_quotes: &quotes,
            content: "body",
        });
        assert_eq!(
            text,
            "Title: T\n\nSummary: S\n\nTopics: A, B\n\nKey quotes: q1 | q2 | q3\n\nContent: body"
        );
    }

    #[test]
    fn embedding_text_cuts_content_before_anything_else() {
        let content = "x".repeat(EMBEDDING_CHAR_BUDGET * 2);
        let text = build_embedding_text(&EmbeddingInput {
            title: "Keep me",
            summary: Some("And me"),
            content: &content,
            ..EmbeddingInput::default()
        });
        assert_eq!(text.chars().count(), EMBEDDING_CHAR_BUDGET);
        assert!(text.starts_with("Title: Keep me\n\nSummary: And me\n\nContent: x"));
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```yaml\na: 1\n```"), "a: 1");
        assert_eq!(strip_code_fences("```\na: 1\n```\ntrailing"), "a: 1");
        assert_eq!(strip_code_fences("  a: 1  "), "a: 1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), ("hé", true));
        assert_eq!(truncate_chars("hi", 5), ("hi", false));
    }
}
