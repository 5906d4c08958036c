use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tlkb_core::UNTITLED;
use tlkb_storage::HttpFetcher;
use tracing::debug;

use crate::{AdapterError, FetchedPost, SourceAdapter, SourceConfig};

pub const MAX_FEED_ENTRIES: usize = 10;

#[derive(Debug, Clone)]
pub struct RssAdapter {
    pub max_entries: usize,
}

impl Default for RssAdapter {
    fn default() -> Self {
        Self {
            max_entries: MAX_FEED_ENTRIES,
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn kind(&self) -> &'static str {
        "rss"
    }

    async fn fetch_posts(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<Vec<FetchedPost>, AdapterError> {
        let feed_url = source
            .rss
            .as_deref()
            .ok_or_else(|| AdapterError::NoEndpoint(source.id.clone()))?;
        let page = http.fetch_text(&source.id, feed_url).await?;
        parse_feed_posts(page.body.as_bytes(), source, Utc::now(), self.max_entries)
    }
}

/// Turn an RSS or Atom document into posts, newest entries as the feed orders them.
///
/// Dates fall back from `published` to `updated` to `now`; content falls back
/// from the entry body to its summary. Entries without a link are dropped.
pub fn parse_feed_posts(
    bytes: &[u8],
    source: &SourceConfig,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<FetchedPost>, AdapterError> {
    let feed = feed_rs::parser::parse(bytes)?;
    let mut posts = Vec::new();
    for entry in feed.entries.into_iter().take(limit) {
        let Some(url) = entry.links.first().map(|l| l.href.clone()) else {
            debug!(entry = %entry.id, "feed entry has no link");
            continue;
        };
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        let content = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        posts.push(FetchedPost {
            title,
            url,
            published: entry.published.or(entry.updated).unwrap_or(now),
            content,
            ..FetchedPost::from_source(source)
        });
    }
    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixture_path;

    fn source() -> SourceConfig {
        SourceConfig {
            id: "simon-example".into(),
            name: "Simon Example".into(),
            rss: Some("https://simon.example.com/feed".into()),
            url: None,
            scrape_selector: None,
            active: true,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn rss_fixture_yields_posts_with_fallbacks() {
        let bytes = std::fs::read(fixture_path("feeds/sample-rss.xml")).unwrap();
        let posts = parse_feed_posts(&bytes, &source(), now(), MAX_FEED_ENTRIES).unwrap();

        assert_eq!(posts.len(), 3);
        let first = &posts[0];
        assert_eq!(first.title, "Agents in practice");
        assert_eq!(first.url, "https://simon.example.com/2025/Mar/14/agents/");
        assert_eq!(first.author, "Simon Example");
        assert_eq!(first.author_id, "simon-example");
        assert_eq!(first.published.format("%Y-%m-%d").to_string(), "2025-03-14");
        assert!(first.content.contains("full body"), "{}", first.content);

        // description only
        assert!(posts[1].content.contains("Summary only"));
        // no pubDate
        assert_eq!(posts[2].published, now());
    }

    #[test]
    fn atom_fixture_uses_updated_when_published_is_missing() {
        let bytes = std::fs::read(fixture_path("feeds/sample-atom.xml")).unwrap();
        let posts = parse_feed_posts(&bytes, &source(), now(), MAX_FEED_ENTRIES).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].published.format("%Y-%m-%d").to_string(), "2025-03-10");
        assert_eq!(posts[1].url, "https://atom.example.com/posts/second");
    }

    #[test]
    fn entry_limit_is_applied() {
        let bytes = std::fs::read(fixture_path("feeds/sample-rss.xml")).unwrap();
        let posts = parse_feed_posts(&bytes, &source(), now(), 1).unwrap();
        assert_eq!(posts.len(), 1);
    }

    #[test]
    fn garbage_is_a_feed_error() {
        let err = parse_feed_posts(b"<html>not a feed</html>", &source(), now(), 10).unwrap_err();
        assert!(matches!(err, AdapterError::Feed(_)));
    }
}
