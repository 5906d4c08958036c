use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use tlkb_storage::{HttpClientConfig, VaultStore, DEFAULT_USER_AGENT};

/// Where the vault and config files live, and how pages are fetched.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: std::env::var("TLKB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            user_agent: std::env::var("TLKB_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("TLKB_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    pub fn vault(&self) -> VaultStore {
        VaultStore::new(&self.root)
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            ..HttpClientConfig::default()
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.root.join("config").join("sources.yaml")
    }

    pub fn topics_path(&self) -> PathBuf {
        self.root.join("config").join("topics.yaml")
    }

    pub fn notifications_path(&self) -> PathBuf {
        self.root.join("config").join("notifications.yaml")
    }
}

/// Remote store credentials. There is no default database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 2,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_value(std::env::var("DATABASE_URL").ok())
    }

    fn from_value(database_url: Option<String>) -> Result<Self> {
        match database_url.filter(|v| !v.trim().is_empty()) {
            Some(url) => Ok(Self::new(url)),
            None => bail!("DATABASE_URL is not set; the remote article store is not configured"),
        }
    }
}
