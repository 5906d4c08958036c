use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tlkb_core::{identity_token, Article, DiataxisType, KeyQuote, Stance};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::StoreConfig;

/// Row content is capped before it is sent to the store.
pub const ROW_CONTENT_LIMIT: usize = 50_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encoding column value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store rejected {url}: {message}")]
    Rejected { url: String, message: String },
}

/// One `articles` row as written by the sync driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRow {
    pub url: String,
    pub url_hash: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub published: Option<NaiveDate>,
    pub fetched: NaiveDate,
    pub topics: Vec<String>,
    pub key_quotes: Vec<KeyQuote>,
    pub stance: BTreeMap<String, Stance>,
    pub evolution_note: String,
    pub tags: Vec<String>,
    pub content: String,
    pub summary: String,
    pub diataxis_type: DiataxisType,
    pub embedding: Option<Vec<f32>>,
}

impl ArticleRow {
    pub fn from_article(
        article: &Article,
        summary: String,
        diataxis_type: DiataxisType,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        let content = match article.content.char_indices().nth(ROW_CONTENT_LIMIT) {
            Some((idx, _)) => article.content[..idx].to_string(),
            None => article.content.clone(),
        };
        let metadata = article.metadata().bounded();
        Self {
            url: article.url.clone(),
            url_hash: identity_token(&article.url),
            title: article.title.clone(),
            author: article.author.clone(),
            author_id: article.author_id.clone(),
            published: article.published,
            fetched: article.fetched.unwrap_or_else(|| Utc::now().date_naive()),
            topics: metadata.topics,
            key_quotes: metadata.key_quotes,
            stance: metadata.stance,
            evolution_note: metadata.evolution_note,
            tags: metadata.tags,
            content,
            summary,
            diataxis_type,
            embedding,
        }
    }
}

/// What the store already knows about a url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub url: String,
    pub has_embedding: bool,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<Option<ExistingRow>, StoreError>;
    /// Insert, or update in place when the url is already present.
    async fn upsert(&self, row: &ArticleRow) -> Result<(), StoreError>;
    /// Cheapest possible round trip, used by `sync --test`.
    async fn probe(&self) -> Result<(), StoreError>;
}

pub struct PgArticleStore {
    pool: PgPool,
}

const UPSERT_SQL: &str = r#"
INSERT INTO articles (
    url, url_hash, title, author, author_id, published, fetched,
    topics, key_quotes, stance, evolution_note, tags,
    content, summary, diataxis_type, embedding, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7,
    $8, $9, $10, $11, $12,
    $13, $14, $15, $16::vector, now()
)
ON CONFLICT (url) DO UPDATE SET
    url_hash = EXCLUDED.url_hash,
    title = EXCLUDED.title,
    author = EXCLUDED.author,
    author_id = EXCLUDED.author_id,
    published = EXCLUDED.published,
    fetched = EXCLUDED.fetched,
    topics = EXCLUDED.topics,
    key_quotes = EXCLUDED.key_quotes,
    stance = EXCLUDED.stance,
    evolution_note = EXCLUDED.evolution_note,
    tags = EXCLUDED.tags,
    content = EXCLUDED.content,
    summary = EXCLUDED.summary,
    diataxis_type = EXCLUDED.diataxis_type,
    embedding = EXCLUDED.embedding,
    updated_at = now()
"#;

impl PgArticleStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// pgvector text literal: `[0.1,0.2,...]`.
pub fn vector_literal(values: &[f32]) -> String {
    let joined = values.iter().map(f32::to_string).collect::<Vec<_>>().join(",");
    format!("[{joined}]")
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn lookup(&self, url: &str) -> Result<Option<ExistingRow>, StoreError> {
        let row = sqlx::query("SELECT url, embedding IS NOT NULL AS has_embedding FROM articles WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(ExistingRow {
                url: row.try_get("url")?,
                has_embedding: row.try_get("has_embedding")?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert(&self, row: &ArticleRow) -> Result<(), StoreError> {
        let topics = serde_json::to_value(&row.topics)?;
        let key_quotes = serde_json::to_value(&row.key_quotes)?;
        let stance = serde_json::to_value(&row.stance)?;
        let tags = serde_json::to_value(&row.tags)?;
        let embedding = row.embedding.as_deref().map(vector_literal);

        let result = sqlx::query(UPSERT_SQL)
            .bind(&row.url)
            .bind(&row.url_hash)
            .bind(&row.title)
            .bind(&row.author)
            .bind(&row.author_id)
            .bind(row.published)
            .bind(row.fetched)
            .bind(topics)
            .bind(key_quotes)
            .bind(stance)
            .bind(&row.evolution_note)
            .bind(tags)
            .bind(&row.content)
            .bind(&row.summary)
            .bind(row.diataxis_type.as_str())
            .bind(embedding)
            .execute(&self.pool)
            .await?;
        debug!(url = %row.url, rows = result.rows_affected(), "upserted article");
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT id FROM articles LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-process store keyed by url. Backs tests and dry runs.
#[derive(Default)]
pub struct MemoryArticleStore {
    rows: Mutex<BTreeMap<String, ArticleRow>>,
    reject_upserts: bool,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upsert fails with [`StoreError::Rejected`].
    pub fn rejecting() -> Self {
        Self {
            rows: Mutex::default(),
            reject_upserts: true,
        }
    }

    pub async fn seed(&self, row: ArticleRow) {
        self.rows.lock().await.insert(row.url.clone(), row);
    }

    pub async fn rows(&self) -> Vec<ArticleRow> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn lookup(&self, url: &str) -> Result<Option<ExistingRow>, StoreError> {
        Ok(self.rows.lock().await.get(url).map(|row| ExistingRow {
            url: row.url.clone(),
            has_embedding: row.embedding.is_some(),
        }))
    }

    async fn upsert(&self, row: &ArticleRow) -> Result<(), StoreError> {
        if self.reject_upserts {
            return Err(StoreError::Rejected {
                url: row.url.clone(),
                message: "store is read-only".to_string(),
            });
        }
        self.rows.lock().await.insert(row.url.clone(), row.clone());
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str, content: &str) -> Article {
        Article {
            title: "T".into(),
            url: url.into(),
            content: content.into(),
            ..Article::default()
        }
    }

    #[test]
    fn row_caps_content_and_defaults_fetched_to_today() {
        let body = "é".repeat(ROW_CONTENT_LIMIT + 10);
        let row = ArticleRow::from_article(&article("https://a.dev/x", &body), "s".into(), DiataxisType::Tutorial, None);
        assert_eq!(row.content.chars().count(), ROW_CONTENT_LIMIT);
        assert_eq!(row.fetched, Utc::now().date_naive());
        assert_eq!(row.url_hash, identity_token("https://a.dev/x"));
    }

    #[test]
    fn row_collections_are_bounded_without_defaults() {
        let mut a = article("https://a.dev/x", "body");
        a.topics = (0..7).map(|i| format!("topic {i}")).collect();
        a.tags = vec!["Dev Tools".into(), "dev tools".into(), "ai".into()];
        let row = ArticleRow::from_article(&a, String::new(), DiataxisType::Explanation, None);
        assert_eq!(row.topics.len(), tlkb_core::MAX_TOPICS);
        assert_eq!(row.tags, vec!["dev-tools", "ai"]);
        assert!(row.evolution_note.is_empty());

        let bare = ArticleRow::from_article(&article("https://a.dev/y", "body"), String::new(), DiataxisType::Explanation, None);
        assert!(bare.topics.is_empty());
        assert!(bare.tags.is_empty());
    }

    #[test]
    fn vector_literal_is_bracketed_csv() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[tokio::test]
    async fn memory_store_upserts_in_place() {
        let store = MemoryArticleStore::new();
        assert_eq!(store.lookup("u").await.unwrap(), None);

        let mut row = ArticleRow::from_article(&article("u", "b"), "s".into(), DiataxisType::Reference, None);
        store.upsert(&row).await.unwrap();
        assert!(!store.lookup("u").await.unwrap().unwrap().has_embedding);

        row.embedding = Some(vec![0.0; 3]);
        store.upsert(&row).await.unwrap();
        assert!(store.lookup("u").await.unwrap().unwrap().has_embedding);
        assert_eq!(store.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn rejecting_store_fails_upserts() {
        let store = MemoryArticleStore::rejecting();
        let row = ArticleRow::from_article(&article("u", "b"), "s".into(), DiataxisType::Reference, None);
        assert!(matches!(store.upsert(&row).await, Err(StoreError::Rejected { .. })));
    }
}
