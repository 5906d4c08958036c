//! Markdown vault storage + HTTP fetch utilities for TLKB.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

mod vault;

pub use vault::{markdown_files, write_atomic, RepairAction, RepairSummary, VaultError, VaultStore};

pub const CRATE_NAME: &str = "tlkb-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; TLKB/1.0)";

/// Throttling and server-side failures are worth another attempt.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Exponential delay between attempts: `initial_delay * 2^n`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub retries: usize,
    pub initial_delay: Duration,
    pub delay_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_delay: Duration::from_millis(500),
            delay_cap: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.delay_cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Sequential page fetcher with a bounded timeout and retry on transient failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut retry = 0usize;
        loop {
            let retries_left = retry < self.backoff.retries;
            let failure = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.text().await?;
                    debug!(%status, bytes = body.len(), "fetched");
                    return Ok(FetchedPage {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(resp) => {
                    let transient = is_transient_status(resp.status());
                    let failure = FetchError::HttpStatus {
                        status: resp.status().as_u16(),
                        url: resp.url().to_string(),
                    };
                    if !(retries_left && transient) {
                        return Err(failure);
                    }
                    failure
                }
                Err(err) => {
                    if !(retries_left && is_transient_error(&err)) {
                        return Err(FetchError::Request(err));
                    }
                    FetchError::Request(err)
                }
            };
            let delay = self.backoff.delay_before_retry(retry);
            debug!(error = %failure, retry, delay_ms = delay.as_millis() as u64, "transient fetch failure");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
