use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tlkb_core::UNTITLED;
use tlkb_storage::HttpFetcher;
use tracing::{debug, warn};

use crate::{AdapterError, FetchedPost, SourceAdapter, SourceConfig};

pub const MAX_INDEX_LINKS: usize = 20;
pub const MAX_SCRAPED_ARTICLES: usize = 5;

/// Path fragments that mark a link as a likely blog post.
pub const BLOG_PATH_PATTERNS: [&str; 4] = ["/blog/", "/post/", "/writing/", "/engineering/"];

const DEFAULT_CONTENT_SELECTOR: &str = "article";

#[derive(Debug, Clone)]
pub struct WebAdapter {
    pub max_links: usize,
    pub max_articles: usize,
}

impl Default for WebAdapter {
    fn default() -> Self {
        Self {
            max_links: MAX_INDEX_LINKS,
            max_articles: MAX_SCRAPED_ARTICLES,
        }
    }
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    fn kind(&self) -> &'static str {
        "web"
    }

    async fn fetch_posts(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<Vec<FetchedPost>, AdapterError> {
        let index_url = source
            .url
            .as_deref()
            .ok_or_else(|| AdapterError::NoEndpoint(source.id.clone()))?;
        let index = http.fetch_text(&source.id, index_url).await?;
        let links = extract_post_links(&index.body, &index.final_url, self.max_links);
        debug!(source = %source.id, links = links.len(), "candidate post links");

        let mut posts = Vec::new();
        for url in links.into_iter().take(self.max_articles) {
            match http.fetch_text(&source.id, &url).await {
                Ok(page) => posts.push(parse_article_page(&page.body, &url, source, Utc::now())),
                Err(err) => warn!(%url, error = %err, "article scrape failed"),
            }
        }
        Ok(posts)
    }
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next()
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    select_first(document, selector).and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    select_first(document, selector)
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

/// Non-empty trimmed text nodes under `element`, one per line, skipping
/// anything inside `script` or `style`.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut lines = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style"))
        });
        if hidden {
            continue;
        }
        let line = text.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

/// Absolute post URLs from the first `max_links` anchors of an index page,
/// kept when the URL contains one of [`BLOG_PATH_PATTERNS`]. Order is
/// preserved and duplicates dropped.
pub fn extract_post_links(html: &str, base_url: &str, max_links: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut links: Vec<String> = Vec::new();
    for anchor in document.select(&anchors).take(max_links) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let absolute = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => href.to_string(),
        };
        let is_post = BLOG_PATH_PATTERNS.iter().any(|p| absolute.contains(p));
        if is_post && !links.contains(&absolute) {
            links.push(absolute);
        }
    }
    links
}

fn parse_page_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Title from `h1`, then `title`. Content from the source's selector, then
/// `article`, then `main`. Date from `time[datetime]`, else `now`.
pub fn parse_article_page(html: &str, url: &str, source: &SourceConfig, now: DateTime<Utc>) -> FetchedPost {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "h1")
        .or_else(|| select_first_text(&document, "title"))
        .unwrap_or_else(|| UNTITLED.to_string());

    let selector = source
        .scrape_selector
        .as_deref()
        .unwrap_or(DEFAULT_CONTENT_SELECTOR);
    let content = [selector, "article", "main"]
        .into_iter()
        .find_map(|sel| select_first(&document, sel))
        .map(visible_text)
        .unwrap_or_default();

    let published = select_first_attr(&document, "time[datetime]", "datetime")
        .and_then(|value| parse_page_date(&value))
        .unwrap_or(now);

    FetchedPost {
        title,
        url: url.to_string(),
        published,
        content,
        ..FetchedPost::from_source(source)
    }
}
