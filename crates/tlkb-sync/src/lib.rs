//! Pipeline orchestration: ingest runs that fill the vault, and sync runs that
//! push vault articles into the remote article store.

mod config;
mod driver;
mod ingest;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tlkb_adapters::SourceRegistry;
use tlkb_enrich::{load_topic_taxonomy, Enricher, LlmConfig, OpenAiClient};
use tlkb_storage::HttpFetcher;
use tracing::{info, warn};

pub use config::{PipelineConfig, StoreConfig};
pub use driver::{SyncDriver, SyncOutcome, SyncStats};
pub use ingest::{clean_content, render_body, IngestOptions, IngestPipeline, IngestSummary};
pub use store::{vector_literal, ArticleRow, ArticleStore, ExistingRow, MemoryArticleStore, PgArticleStore, StoreError, ROW_CONTENT_LIMIT};

pub const CRATE_NAME: &str = "tlkb-sync";

/// Enricher backed by the OpenAI-compatible client, with the topic taxonomy
/// from `config/topics.yaml`.
pub fn enricher_from_env(pipeline: &PipelineConfig) -> Result<Enricher> {
    let llm = LlmConfig::from_env();
    if !llm.has_api_key() {
        warn!("OPENAI_API_KEY not set; enrichment will fall back to defaults");
    }
    let client = Arc::new(OpenAiClient::new(llm)?);
    Ok(Enricher::new(client.clone(), client).with_taxonomy(load_topic_taxonomy(&pipeline.topics_path())))
}

pub async fn run_ingest_from_env(options: IngestOptions) -> Result<IngestSummary> {
    let config = PipelineConfig::from_env();
    let registry = SourceRegistry::load(config.sources_path())?;
    let fetcher = HttpFetcher::new(config.http_config())?;
    let pipeline = IngestPipeline::new(config.vault(), fetcher, registry, enricher_from_env(&config)?);
    pipeline.run(options).await
}

/// Missing store credentials fail here, before any article is read.
pub async fn run_sync_from_env(force: bool) -> Result<SyncStats> {
    let config = PipelineConfig::from_env();
    let store_config = StoreConfig::from_env()?;
    let store = PgArticleStore::connect(&store_config)
        .await
        .context("connecting to the article store")?;
    let driver = SyncDriver::new(config.vault(), Arc::new(store), enricher_from_env(&config)?);
    driver.run(force).await
}

pub async fn test_store_connection_from_env() -> Result<()> {
    let store_config = StoreConfig::from_env()?;
    let store = PgArticleStore::connect(&store_config)
        .await
        .context("connecting to the article store")?;
    store.probe().await.context("probing the articles table")?;
    info!("article store connection ok");
    Ok(())
}
