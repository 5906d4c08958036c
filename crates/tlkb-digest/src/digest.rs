use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;
use tlkb_core::{repair_document, Article, RepairOutcome};
use tlkb_enrich::{GenerationRequest, TextGenerator};
use tlkb_storage::{write_atomic, VaultStore};
use tokio::fs;
use tracing::{info, warn};

/// Quotes per post offered to the model.
const PROMPT_QUOTES_PER_POST: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestOptions {
    pub days: i64,
    pub use_llm: bool,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self { days: 7, use_llm: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    pub week: String,
    pub posts_count: usize,
    pub markdown_file: PathBuf,
    pub html_file: PathBuf,
    pub synthesized: bool,
    pub content: String,
}

/// `2025-W10` style label; weeks start on Sunday.
pub fn week_label(now: DateTime<Utc>) -> String {
    now.format("%Y-W%U").to_string()
}

/// Articles published within `days` of `today` (inclusive), newest first.
/// Headers are repaired in memory only; the vault is never rewritten here.
pub async fn find_recent_posts(vault: &VaultStore, days: i64, today: NaiveDate) -> Result<Vec<Article>> {
    let start = today - Duration::days(days);
    let mut posts = Vec::new();
    for path in vault.article_paths().await? {
        let Some(article) = read_article(&path).await else {
            continue;
        };
        if article.published.is_some_and(|d| d >= start && d <= today) {
            posts.push(article);
        }
    }
    posts.sort_by(|a, b| b.published.cmp(&a.published));
    Ok(posts)
}

async fn read_article(path: &Path) -> Option<Article> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable article");
            return None;
        }
    };
    match repair_document(&text) {
        Ok(RepairOutcome::AlreadyValid(article)) | Ok(RepairOutcome::Repaired { article, .. }) => Some(article),
        Ok(_) => {
            warn!(path = %path.display(), "skipping article without a usable header");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping article");
            None
        }
    }
}

fn published_label(article: &Article) -> String {
    article
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

const DIGEST_SYSTEM: &str = "You are an expert at synthesizing technical content into insightful digests. \
You understand AI, coding tools, software development, and thought leadership. \
You identify patterns, connections, and emerging trends across multiple sources.";

pub fn digest_request(posts: &[Article]) -> GenerationRequest {
    let summaries = posts
        .iter()
        .map(|post| {
            let mut summary = format!(
                "**{}** by {}\nPublished: {}\nURL: {}\nTopics: {}\nEvolution note: {}",
                post.title,
                post.author,
                published_label(post),
                post.url,
                post.topics.join(", "),
                post.evolution_note
            );
            if !post.key_quotes.is_empty() {
                summary.push_str("\n\nKey quotes:");
                for quote in post.key_quotes.iter().take(PROMPT_QUOTES_PER_POST) {
                    summary.push_str(&format!("\n  - \"{}\"", quote.text));
                }
            }
            summary
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let user = format!(
        "Create a compelling weekly digest for AI thought leadership content.

**This week's posts ({count} total):**

{summaries}

**Generate a digest with these sections:**

1. **Executive Summary** (2-3 sentences)
   - What's the big picture this week?
   - Any emerging themes or surprising insights?

2. **Highlights by Theme**
   - Group related posts by common themes
   - For each theme: brief synthesis + which authors contributed

3. **Notable Quotes** (3-5 most impactful)
   - Include quote + author + why it matters

4. **Evolution Watch**
   - Track how ideas are evolving
   - Note any shifts in perspective or new paradigms

5. **Recommended Reads** (Top 3)
   - Which posts are must-reads and why?
   - Brief value proposition for each

**Format:**
- Use markdown
- Keep it concise but insightful
- Link to original posts: [Title](url)
- Highlight cross-author connections
- Note areas of agreement/disagreement if any

**Tone:**
- Professional but engaging
- Focus on insights, not summaries
- Synthesize, don't just list
",
        count = posts.len()
    );

    GenerationRequest {
        system: DIGEST_SYSTEM.to_string(),
        user,
        temperature: 0.7,
        max_tokens: 2000,
    }
}

/// Plain listing used when no model is available or the model call fails.
pub fn simple_digest(posts: &[Article], week: &str, generated: DateTime<Utc>) -> String {
    let mut digest = format!(
        "# Weekly AI Thought Leadership Digest\n\n**Week**: {week}  \n**Posts**: {}  \n**Generated**: {}\n\n---\n\n## This Week's Posts\n\n",
        posts.len(),
        generated.format("%Y-%m-%d %H:%M")
    );
    for post in posts {
        digest.push_str(&format!(
            "### [{}]({})\n\n**Author**: {}  \n**Published**: {}  \n**Topics**: {}  \n\n",
            post.title,
            post.url,
            post.author,
            published_label(post),
            post.topics.join(", ")
        ));
        if let Some(quote) = post.key_quotes.first() {
            digest.push_str(&format!("**Key Quote**:\n> {}\n\n", quote.text));
        }
        digest.push_str("---\n\n");
    }
    digest
}

pub fn digest_document(content: &str, week: &str, generated: DateTime<Utc>) -> String {
    format!(
        "---\nweek: {week}\ngenerated: {}\ntype: weekly-digest\n---\n\n{content}",
        generated.to_rfc3339()
    )
}

pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES | Options::ENABLE_STRIKETHROUGH;
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}

/// Digest body wrapped in a standalone page suitable as an email body.
pub fn digest_email_html(markdown: &str, week: &str) -> String {
    let body = markdown_to_html(markdown);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            line-height: 1.6;
            color: #333;
            max-width: 700px;
            margin: 0 auto;
            padding: 20px;
        }}
        h1, h2, h3 {{ color: #2c3e50; }}
        blockquote {{
            border-left: 4px solid #3498db;
            padding-left: 20px;
            margin-left: 0;
            font-style: italic;
            color: #555;
        }}
        a {{ color: #3498db; text-decoration: none; }}
        a:hover {{ text-decoration: underline; }}
        hr {{ border: none; border-top: 1px solid #eee; margin: 30px 0; }}
    </style>
</head>
<body>
{body}
    <hr>
    <p style="font-size: 12px; color: #999; text-align: center;">
        AI Thought Leadership Knowledge Base · Week {week}
    </p>
</body>
</html>
"#
    )
}

pub struct DigestGenerator {
    vault: VaultStore,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl DigestGenerator {
    pub fn new(vault: VaultStore, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { vault, generator }
    }

    pub async fn generate(&self, options: DigestOptions) -> Result<Option<DigestReport>> {
        self.generate_at(options, Utc::now()).await
    }

    /// `None` when there is nothing recent to digest.
    pub async fn generate_at(&self, options: DigestOptions, now: DateTime<Utc>) -> Result<Option<DigestReport>> {
        let week = week_label(now);
        let posts = find_recent_posts(&self.vault, options.days, now.date_naive()).await?;
        info!(%week, posts = posts.len(), days = options.days, "collecting digest posts");
        if posts.is_empty() {
            info!("no new posts to digest");
            return Ok(None);
        }

        let synthesized = match (&self.generator, options.use_llm) {
            (Some(generator), true) => match generator.generate(&digest_request(&posts)).await {
                Ok(reply) if !reply.trim().is_empty() => Some(reply.trim().to_string()),
                Ok(_) => {
                    warn!("empty digest reply; using simple digest");
                    None
                }
                Err(err) => {
                    warn!(error = %err, "digest generation failed; using simple digest");
                    None
                }
            },
            _ => None,
        };
        let was_synthesized = synthesized.is_some();
        let content = synthesized.unwrap_or_else(|| simple_digest(&posts, &week, now));

        let dir = self.vault.digests_dir();
        let markdown_file = dir.join(format!("{week}.md"));
        write_atomic(&markdown_file, digest_document(&content, &week, now).as_bytes())
            .await
            .with_context(|| format!("writing digest {}", markdown_file.display()))?;
        let html_file = dir.join(format!("{week}.html"));
        write_atomic(&html_file, digest_email_html(&content, &week).as_bytes())
            .await
            .with_context(|| format!("writing digest {}", html_file.display()))?;
        info!(markdown = %markdown_file.display(), html = %html_file.display(), "digest saved");

        Ok(Some(DigestReport {
            week,
            posts_count: posts.len(),
            markdown_file,
            html_file,
            synthesized: was_synthesized,
            content,
        }))
    }
}
