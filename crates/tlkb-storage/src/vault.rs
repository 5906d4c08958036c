//! The markdown vault: `content/authors/<author_id>/<date>-<slug>-<token>.md`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use thiserror::Error;
use tlkb_core::{identity_token, render_document, repair_document, Article, RecoveryError, RepairOutcome};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
    #[error("{} has no front matter header", path.display())]
    NoHeader { path: PathBuf },
    #[error("{}: {source}", path.display())]
    Unrecoverable {
        path: PathBuf,
        #[source]
        source: RecoveryError,
    },
    #[error("rendering header for {}: {source}", path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// What a repair pass did to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    AlreadyValid,
    Repaired,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub scanned: usize,
    pub already_valid: usize,
    pub repaired: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn authors_dir(&self) -> PathBuf {
        self.root.join("content").join("authors")
    }

    pub fn author_dir(&self, author_id: &str) -> PathBuf {
        self.authors_dir().join(author_id)
    }

    pub fn digests_dir(&self) -> PathBuf {
        self.root.join("content").join("synthesis").join("weekly-digests")
    }

    /// True when the author partition already holds this URL, matched by
    /// identity token in the file name or by the literal URL in the file body.
    /// Unreadable files are skipped. An empty URL never exists.
    pub async fn exists(&self, author_id: &str, url: &str) -> anyhow::Result<bool> {
        if url.trim().is_empty() {
            return Ok(false);
        }
        let token = identity_token(url);
        for path in markdown_files(&self.author_dir(author_id)).await? {
            let named = path
                .file_name()
                .map(|n| n.to_string_lossy().contains(&token))
                .unwrap_or(false);
            if named {
                return Ok(true);
            }
            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };
            if text.contains(url) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Render and store an article under its author partition.
    pub async fn write_article(&self, article: &Article, fallback_date: NaiveDate) -> anyhow::Result<PathBuf> {
        let path = self
            .author_dir(&article.author_id)
            .join(article.file_name(fallback_date));
        let document = render_document(article)
            .with_context(|| format!("rendering front matter for {}", article.url))?;
        write_atomic(&path, document.as_bytes()).await?;
        debug!(path = %path.display(), "article written");
        Ok(path)
    }

    /// Every `*.md` file under every author partition, sorted by path.
    pub async fn article_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for dir in subdirectories(&self.authors_dir()).await? {
            paths.extend(markdown_files(&dir).await?);
        }
        paths.sort();
        Ok(paths)
    }

    /// Parse one article file, repairing and rewriting it when the strict
    /// codec rejects its header.
    pub async fn load_article(&self, path: &Path) -> Result<Article, VaultError> {
        let text = fs::read_to_string(path).await.map_err(|source| VaultError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_repair(path, &text).await.map(|(article, _)| article)
    }

    pub async fn repair_file(&self, path: &Path) -> Result<RepairAction, VaultError> {
        let text = fs::read_to_string(path).await.map_err(|source| VaultError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match self.apply_repair(path, &text).await {
            Ok((_, action)) => Ok(action),
            Err(VaultError::NoHeader { .. }) | Err(VaultError::Unrecoverable { .. }) => {
                Ok(RepairAction::Skipped)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn repair_all(&self) -> anyhow::Result<RepairSummary> {
        let mut summary = RepairSummary::default();
        for path in self.article_paths().await? {
            summary.scanned += 1;
            match self.repair_file(&path).await {
                Ok(RepairAction::AlreadyValid) => summary.already_valid += 1,
                Ok(RepairAction::Repaired) => summary.repaired += 1,
                Ok(RepairAction::Skipped) => summary.skipped += 1,
                Err(err) => {
                    warn!(error = %err, "repair failed");
                    summary.failed += 1;
                }
            }
        }
        info!(
            scanned = summary.scanned,
            repaired = summary.repaired,
            skipped = summary.skipped,
            failed = summary.failed,
            "repair pass complete"
        );
        Ok(summary)
    }

    async fn apply_repair(&self, path: &Path, text: &str) -> Result<(Article, RepairAction), VaultError> {
        let outcome = repair_document(text).map_err(|source| VaultError::Render {
            path: path.to_path_buf(),
            source,
        })?;
        match outcome {
            RepairOutcome::AlreadyValid(article) => Ok((article, RepairAction::AlreadyValid)),
            RepairOutcome::Repaired { article, document } => {
                write_atomic(path, document.as_bytes())
                    .await
                    .map_err(|err| VaultError::Write {
                        path: path.to_path_buf(),
                        message: format!("{err:#}"),
                    })?;
                info!(path = %path.display(), title = %article.title, "repaired front matter");
                Ok((article, RepairAction::Repaired))
            }
            RepairOutcome::NoHeader => {
                warn!(path = %path.display(), "no front matter header");
                Err(VaultError::NoHeader {
                    path: path.to_path_buf(),
                })
            }
            RepairOutcome::Unrecoverable(source) => {
                warn!(path = %path.display(), error = %source, "front matter unrecoverable");
                Err(VaultError::Unrecoverable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Write through a uniquely named temp file in the target directory, then rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

async fn subdirectories(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("reading {}", dir.display()))?
    {
        if entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// `*.md` files directly inside `dir`; a missing directory is empty.
pub async fn markdown_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("reading {}", dir.display()))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false);
        if is_file && path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
