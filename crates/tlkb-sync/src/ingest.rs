use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use tlkb_adapters::{fetch_source, FetchedPost, SourceRegistry};
use tlkb_core::{slugify, Article, ArticleMetadata};
use tlkb_enrich::Enricher;
use tlkb_storage::{HttpFetcher, VaultStore};
use tracing::{info, info_span, warn, Instrument};

static EXTRA_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub days_back: i64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            days_back: 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub new_articles: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Paths written, or that would have been written on a dry run.
    pub files: Vec<PathBuf>,
}

impl IngestSummary {
    fn limit_reached(&self, options: &IngestOptions) -> bool {
        options.limit.is_some_and(|limit| self.new_articles >= limit)
    }
}

/// Fetch every active source, enrich new posts and store them in the vault.
pub struct IngestPipeline {
    vault: VaultStore,
    fetcher: HttpFetcher,
    registry: SourceRegistry,
    enricher: Enricher,
}

impl IngestPipeline {
    pub fn new(vault: VaultStore, fetcher: HttpFetcher, registry: SourceRegistry, enricher: Enricher) -> Self {
        Self {
            vault,
            fetcher,
            registry,
            enricher,
        }
    }

    pub async fn run(&self, options: IngestOptions) -> Result<IngestSummary> {
        let now = Utc::now();
        let cutoff = now - Duration::days(options.days_back);
        info!(days_back = options.days_back, cutoff = %cutoff.date_naive(), dry_run = options.dry_run, "starting ingest");

        let mut summary = IngestSummary::default();
        for source in self.registry.active() {
            let span = info_span!("source", source_id = %source.id);
            let posts = fetch_source(&self.fetcher, source).instrument(span.clone()).await;
            self.ingest_posts(&posts, &options, cutoff, &mut summary)
                .instrument(span)
                .await?;
            if summary.limit_reached(&options) {
                info!(limit = ?options.limit, "article limit reached");
                break;
            }
        }

        info!(
            new_articles = summary.new_articles,
            skipped = summary.skipped,
            failed = summary.failed,
            "ingest finished"
        );
        Ok(summary)
    }

    /// Filter, enrich and store one source's posts, updating `summary`.
    /// Stops early once the article limit is reached.
    pub async fn ingest_posts(
        &self,
        posts: &[FetchedPost],
        options: &IngestOptions,
        cutoff: DateTime<Utc>,
        summary: &mut IngestSummary,
    ) -> Result<()> {
        for post in posts {
            if summary.limit_reached(options) {
                break;
            }
            if post.published < cutoff {
                info!(url = %post.url, published = %post.published.date_naive(), "skipping: too old");
                summary.skipped += 1;
                continue;
            }
            match self.vault.exists(&post.author_id, &post.url).await {
                Ok(true) => {
                    info!(url = %post.url, "skipping: exists");
                    summary.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(url = %post.url, error = %format!("{err:#}"), "existence check failed");
                    summary.failed += 1;
                    continue;
                }
            }

            info!(url = %post.url, title = %post.title, "new article");
            match self.store_post(post, options.dry_run).await {
                Ok(path) => {
                    summary.new_articles += 1;
                    summary.files.push(path);
                }
                Err(err) => {
                    warn!(url = %post.url, error = %format!("{err:#}"), "saving article failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn store_post(&self, post: &FetchedPost, dry_run: bool) -> Result<PathBuf> {
        let today = Utc::now().date_naive();
        let mut article = Article {
            title: post.title.clone(),
            author: post.author.clone(),
            author_id: post.author_id.clone(),
            url: post.url.clone(),
            published: Some(post.published.date_naive()),
            fetched: Some(today),
            content: post.content.clone(),
            ..Article::default()
        };
        let metadata = self.enricher.extract_metadata(&article).await;
        article.content = render_body(post, &metadata);
        article.apply_metadata(metadata);

        if dry_run {
            let path = self
                .vault
                .author_dir(&article.author_id)
                .join(article.file_name(today));
            info!(path = %path.display(), "dry run; not written");
            return Ok(path);
        }
        self.vault.write_article(&article, today).await
    }
}

/// Collapse runs of blank lines and trim.
pub fn clean_content(content: &str) -> String {
    EXTRA_BLANK_LINES.replace_all(content, "\n\n").trim().to_string()
}

/// Markdown body stored under the front matter of a freshly ingested post.
pub fn render_body(post: &FetchedPost, metadata: &ArticleMetadata) -> String {
    let published = post.published.format("%Y-%m-%d");
    let mut body = format!(
        "# {title}\n\n**Author**: {author}  \n**Published**: {published}  \n**Source**: [{url}]({url})\n\n---\n\n",
        title = post.title,
        author = post.author,
        url = post.url,
    );
    body.push_str(&clean_content(&post.content));
    body.push_str("\n\n---\n\n## Key Takeaways\n\n");

    if !metadata.key_quotes.is_empty() {
        body.push_str("### Notable Quotes\n\n");
        for quote in &metadata.key_quotes {
            body.push_str(&format!("> {}\n\n*Context: {}*\n\n", quote.text, quote.context));
        }
    }

    if !metadata.topics.is_empty() {
        body.push_str("## Related Topics\n\n");
        for topic in &metadata.topics {
            body.push_str(&format!("- [[topics/{}]]\n", slugify(topic)));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tlkb_core::{KeyQuote, Stance};
    use tlkb_enrich::{Embedder, GenerationRequest, LlmError, TextGenerator};
    use tlkb_storage::HttpClientConfig;

    use super::*;

    const METADATA_REPLY: &str = "```yaml\ntopics:\n  - AI Agents\n  - Context Windows\nkey_quotes:\n  - text: Context is everything.\n    context: On prompt design\nstance:\n  claude_code: positive\nevolution_note: Early exploration.\ntags:\n  - agents\n```";

    struct YamlGenerator;

    #[async_trait]
    impl TextGenerator for YamlGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
            Ok(METADATA_REPLY.to_string())
        }
    }

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::EmptyResponse)
        }
    }

    fn pipeline(root: &std::path::Path) -> IngestPipeline {
        let enricher = Enricher::new(Arc::new(YamlGenerator), Arc::new(NoEmbedder));
        IngestPipeline::new(
            VaultStore::new(root),
            HttpFetcher::new(HttpClientConfig::default()).unwrap(),
            SourceRegistry { sources: Vec::new() },
            enricher,
        )
    }

    fn post(slug: &str, days_ago: i64) -> FetchedPost {
        FetchedPost {
            title: format!("Post {slug}"),
            url: format!("https://ann.dev/blog/{slug}"),
            published: Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap() - Duration::days(days_ago),
            content: "First paragraph.\n\n\n\nSecond paragraph.".to_string(),
            author: "Ann Example".to_string(),
            author_id: "ann".to_string(),
        }
    }

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 13, 12, 0, 0).unwrap()
    }

    #[test]
    fn body_carries_quotes_and_topic_links() {
        let metadata = ArticleMetadata {
            topics: vec!["AI Agents".into()],
            key_quotes: vec![KeyQuote {
                text: "Ship it.".into(),
                context: "On release cadence".into(),
            }],
            ..ArticleMetadata::default()
        };
        let body = render_body(&post("a", 0), &metadata);
        assert!(body.starts_with("# Post a\n\n**Author**: Ann Example  \n**Published**: 2025-03-20  \n"));
        assert!(body.contains("**Source**: [https://ann.dev/blog/a](https://ann.dev/blog/a)"));
        assert!(body.contains("First paragraph.\n\nSecond paragraph."));
        assert!(body.contains("### Notable Quotes\n\n> Ship it.\n\n*Context: On release cadence*"));
        assert!(body.ends_with("## Related Topics\n\n- [[topics/ai-agents]]\n"));
    }

    #[test]
    fn body_without_metadata_keeps_takeaways_heading_only() {
        let body = render_body(&post("a", 0), &ArticleMetadata::default());
        assert!(body.ends_with("## Key Takeaways\n\n"));
    }

    #[tokio::test]
    async fn new_posts_are_enriched_and_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let posts = vec![post("fresh", 1), post("stale", 30)];

        let mut summary = IngestSummary::default();
        pipeline
            .ingest_posts(&posts, &IngestOptions::default(), cutoff(), &mut summary)
            .await
            .unwrap();
        assert_eq!((summary.new_articles, summary.skipped, summary.failed), (1, 1, 0));

        let article = pipeline.vault.load_article(&summary.files[0]).await.unwrap();
        assert_eq!(article.title, "Post fresh");
        assert_eq!(article.topics, vec!["AI Agents", "Context Windows"]);
        assert_eq!(article.stance.get("claude_code"), Some(&Stance::Positive));
        assert!(article.content.contains("- [[topics/context-windows]]"));

        let mut again = IngestSummary::default();
        pipeline
            .ingest_posts(&posts, &IngestOptions::default(), cutoff(), &mut again)
            .await
            .unwrap();
        assert_eq!((again.new_articles, again.skipped), (0, 2));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing_and_limit_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let posts = vec![post("one", 1), post("two", 2), post("three", 3)];
        let options = IngestOptions {
            dry_run: true,
            limit: Some(2),
            days_back: 7,
        };

        let mut summary = IngestSummary::default();
        pipeline.ingest_posts(&posts, &options, cutoff(), &mut summary).await.unwrap();
        assert_eq!(summary.new_articles, 2);
        let expected = format!("2025-03-19-post-one-{}.md", tlkb_core::identity_token("https://ann.dev/blog/one"));
        assert_eq!(summary.files[0], pipeline.vault.author_dir("ann").join(expected));
        assert!(pipeline.vault.article_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_vault_file_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let partition = pipeline.vault.author_dir("ann");
        std::fs::create_dir_all(&partition).unwrap();
        std::fs::write(partition.join("2020-01-01-legacy-deadbeef.md"), b"\xff\xfe\x00\x80").unwrap();

        let mut summary = IngestSummary::default();
        pipeline
            .ingest_posts(&[post("one", 1), post("two", 2)], &IngestOptions::default(), cutoff(), &mut summary)
            .await
            .unwrap();
        assert_eq!((summary.new_articles, summary.skipped, summary.failed), (2, 0, 0));
    }

    #[tokio::test]
    async fn failed_existence_checks_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let partition = pipeline.vault.author_dir("ann");
        std::fs::create_dir_all(partition.parent().unwrap()).unwrap();
        std::fs::write(&partition, "not a directory").unwrap();

        let mut summary = IngestSummary::default();
        pipeline
            .ingest_posts(&[post("one", 1), post("two", 2)], &IngestOptions::default(), cutoff(), &mut summary)
            .await
            .unwrap();
        assert_eq!((summary.new_articles, summary.failed), (0, 2));
    }
}
