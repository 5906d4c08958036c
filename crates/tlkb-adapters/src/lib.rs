//! Source registry + RSS and web-scrape adapters.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tlkb_storage::{FetchError, HttpFetcher};
use tracing::{info, warn};

mod rss;
mod web;

pub use rss::{parse_feed_posts, RssAdapter, MAX_FEED_ENTRIES};
pub use web::{extract_post_links, parse_article_page, WebAdapter, BLOG_PATH_PATTERNS, MAX_INDEX_LINKS, MAX_SCRAPED_ARTICLES};

pub const CRATE_NAME: &str = "tlkb-adapters";

fn default_active() -> bool {
    true
}

/// One entry of `config/sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rss: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub scrape_selector: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn active(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.active)
    }
}

/// A post as fetched from a source, before any enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPost {
    pub title: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub content: String,
    pub author: String,
    pub author_id: String,
}

impl FetchedPost {
    fn from_source(source: &SourceConfig) -> Self {
        Self {
            title: String::new(),
            url: String::new(),
            published: Utc::now(),
            content: String::new(),
            author: source.name.clone(),
            author_id: source.id.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("feed parse failed: {0}")]
    Feed(#[from] feed_rs::parser::ParseFeedError),
    #[error("source {0} has neither an rss nor a url entry")]
    NoEndpoint(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn fetch_posts(
        &self,
        http: &HttpFetcher,
        source: &SourceConfig,
    ) -> Result<Vec<FetchedPost>, AdapterError>;
}

/// RSS when the source lists a feed, web scraping otherwise.
pub fn adapter_for_source(source: &SourceConfig) -> Option<Box<dyn SourceAdapter>> {
    if source.rss.is_some() {
        Some(Box::new(RssAdapter::default()))
    } else if source.url.is_some() {
        Some(Box::new(WebAdapter::default()))
    } else {
        None
    }
}

/// Fetch one source, logging failures and yielding no posts for it.
pub async fn fetch_source(http: &HttpFetcher, source: &SourceConfig) -> Vec<FetchedPost> {
    let Some(adapter) = adapter_for_source(source) else {
        warn!(source = %source.id, error = %AdapterError::NoEndpoint(source.id.clone()), "skipping source");
        return Vec::new();
    };
    match adapter.fetch_posts(http, source).await {
        Ok(posts) => {
            info!(source = %source.id, kind = adapter.kind(), posts = posts.len(), "fetched source");
            posts
        }
        Err(err) => {
            warn!(source = %source.id, kind = adapter.kind(), error = %err, "source fetch failed");
            Vec::new()
        }
    }
}
