use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tlkb_digest::{load_latest_digest, DigestGenerator, DigestOptions, NotificationConfig, Notifier};
use tlkb_enrich::{LlmConfig, OpenAiClient, TextGenerator};
use tlkb_sync::{IngestOptions, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tlkb")]
#[command(about = "Thought-leadership knowledge base pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch configured sources and store new articles in the vault.
    Ingest {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 7)]
        days_back: i64,
        /// Announce new files on Slack.
        #[arg(long)]
        notify: bool,
    },
    /// Rewrite malformed front matter in place.
    Repair,
    /// Push vault articles into the article store.
    Sync {
        /// Re-enrich and overwrite rows that already have an embedding.
        #[arg(long)]
        force: bool,
        /// Only check the store connection.
        #[arg(long)]
        test: bool,
    },
    /// Write this week's digest.
    Digest {
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long)]
        no_llm: bool,
    },
    /// Send the latest digest.
    Notify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tlkb=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Ingest {
            dry_run,
            limit,
            days_back,
            notify,
        } => {
            let summary = tlkb_sync::run_ingest_from_env(IngestOptions {
                dry_run,
                limit,
                days_back,
            })
            .await?;
            println!(
                "ingest complete: new={} skipped={} failed={}",
                summary.new_articles, summary.skipped, summary.failed
            );
            for file in &summary.files {
                println!("  {}", file.display());
            }
            if notify && !dry_run {
                let notifier = Notifier::from_env(NotificationConfig::load(config.notifications_path())?)?;
                let status = notifier.notify_new_posts(&summary.files).await;
                info!(?status, "new post notification");
            }
        }
        Commands::Repair => {
            let summary = config.vault().repair_all().await?;
            println!(
                "repair complete: scanned={} valid={} repaired={} skipped={} failed={}",
                summary.scanned, summary.already_valid, summary.repaired, summary.skipped, summary.failed
            );
        }
        Commands::Sync { test: true, .. } => {
            tlkb_sync::test_store_connection_from_env().await?;
            println!("store connection ok");
        }
        Commands::Sync { force, .. } => {
            let stats = tlkb_sync::run_sync_from_env(force).await?;
            println!(
                "sync complete: synced={} skipped={} failed={}",
                stats.synced, stats.skipped, stats.failed
            );
        }
        Commands::Digest { days, no_llm } => {
            let generator = if no_llm { None } else { text_generator()? };
            let digests = DigestGenerator::new(config.vault(), generator);
            match digests.generate(DigestOptions { days, use_llm: !no_llm }).await? {
                Some(report) => println!(
                    "digest {}: posts={} markdown={} html={}",
                    report.week,
                    report.posts_count,
                    report.markdown_file.display(),
                    report.html_file.display()
                ),
                None => println!("no posts in the last {days} days"),
            }
        }
        Commands::Notify => {
            let notifier = Notifier::from_env(NotificationConfig::load(config.notifications_path())?)?;
            let digest = load_latest_digest(&config.vault().digests_dir())
                .await?
                .context("no digest found to send")?;
            let report = notifier.send_digest(&digest).await;
            println!("notify {}: email={:?} slack={:?}", digest.week, report.email, report.slack);
        }
    }

    Ok(())
}

fn text_generator() -> Result<Option<Arc<dyn TextGenerator>>> {
    let llm = LlmConfig::from_env();
    if !llm.has_api_key() {
        warn!("OPENAI_API_KEY not set; using simple digest");
        return Ok(None);
    }
    Ok(Some(Arc::new(OpenAiClient::new(llm)?)))
}
