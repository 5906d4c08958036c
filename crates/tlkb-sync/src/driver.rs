use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tlkb_core::Article;
use tlkb_enrich::{summarize, EmbeddingInput, Enricher};
use tlkb_storage::VaultStore;
use tracing::{info, info_span, warn, Instrument};

use crate::store::{ArticleRow, ArticleStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Skipped,
    Failed,
}

/// Pushes vault articles into the remote store, enriching only what the store
/// is missing.
pub struct SyncDriver {
    vault: VaultStore,
    store: Arc<dyn ArticleStore>,
    enricher: Enricher,
}

impl SyncDriver {
    pub fn new(vault: VaultStore, store: Arc<dyn ArticleStore>, enricher: Enricher) -> Self {
        Self { vault, store, enricher }
    }

    pub async fn run(&self, force: bool) -> Result<SyncStats> {
        let paths = self.vault.article_paths().await?;
        info!(files = paths.len(), force, "starting sync");

        let mut stats = SyncStats::default();
        for path in paths {
            let outcome = match self.vault.load_article(&path).await {
                Ok(article) => {
                    let span = info_span!("sync_article", path = %path.display());
                    self.sync_article(&article, force).instrument(span).await
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable article");
                    SyncOutcome::Failed
                }
            };
            match outcome {
                SyncOutcome::Synced => stats.synced += 1,
                SyncOutcome::Skipped => stats.skipped += 1,
                SyncOutcome::Failed => stats.failed += 1,
            }
        }

        info!(synced = stats.synced, skipped = stats.skipped, failed = stats.failed, "sync finished");
        Ok(stats)
    }

    pub async fn sync_article(&self, article: &Article, force: bool) -> SyncOutcome {
        if article.url.trim().is_empty() {
            warn!(title = %article.title, "article has no url");
            return SyncOutcome::Failed;
        }

        match self.store.lookup(&article.url).await {
            Ok(Some(existing)) if existing.has_embedding && !force => {
                info!(url = %article.url, "already synced");
                return SyncOutcome::Skipped;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(url = %article.url, error = %err, "lookup failed");
                return SyncOutcome::Failed;
            }
        }

        let summary = summarize(&article.title, &article.content, &article.key_quotes);
        let author = Some(article.author.as_str()).filter(|a| !a.is_empty());
        let diataxis_type = self.enricher.classify(&article.title, &article.content, author).await;
        let embedding = self
            .enricher
            .embed_article(&EmbeddingInput {
                title: &article.title,
                summary: Some(summary.as_str()),
                topics: &article.topics,
                key_quotes: &article.key_quotes,
                content: &article.content,
            })
            .await;
        let Some(embedding) = embedding else {
            warn!(url = %article.url, "no embedding; row left untouched");
            return SyncOutcome::Failed;
        };

        let row = ArticleRow::from_article(article, summary, diataxis_type, Some(embedding));
        match self.store.upsert(&row).await {
            Ok(()) => {
                info!(url = %article.url, %diataxis_type, "synced");
                SyncOutcome::Synced
            }
            Err(err) => {
                warn!(url = %article.url, error = %err, "upsert failed");
                SyncOutcome::Failed
            }
        }
    }
}
