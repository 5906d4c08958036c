use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tlkb_storage::markdown_files;
use tokio::fs;
use tracing::{info, warn};

/// Slack rejects section text above 3000 chars.
pub const SLACK_SECTION_LIMIT: usize = 2900;
pub const SLACK_SUMMARY_LINES: usize = 10;
pub const NEW_POSTS_LISTED: usize = 5;
const FOOTER: &str = "AI Thought Leadership Knowledge Base";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address {address:?}: {message}")]
    InvalidAddress { address: String, message: String },
    #[error("building email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("webhook request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    WebhookStatus { status: u16, body: String },
    #[error("mail task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryStatus {
    Sent,
    Disabled,
    /// Enabled, but a secret or recipient list is missing.
    NotConfigured,
    Failed,
}

impl DeliveryStatus {
    pub fn is_sent(self) -> bool {
        self == DeliveryStatus::Sent
    }
}

#[derive(Debug, Deserialize)]
struct NotificationsFile {
    notifications: NotificationConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub from_email: String,
    pub subject_prefix: String,
    pub smtp_host: String,
    pub smtp_username: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            from_email: "noreply@example.com".to_string(),
            subject_prefix: String::new(),
            smtp_host: "smtp.sendgrid.net".to_string(),
            smtp_username: "apikey".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub channel: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: "#general".to_string(),
        }
    }
}

impl NotificationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str::<NotificationsFile>(text)?.notifications)
    }
}

/// The most recently written digest, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub week: String,
    pub markdown: String,
    pub html: Option<String>,
    pub file: PathBuf,
}

/// Latest `*.md` in `dir` by modification time, with its `.html` sibling.
pub async fn load_latest_digest(dir: &Path) -> Result<Option<Digest>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for path in markdown_files(dir).await? {
        let modified = fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .with_context(|| format!("reading mtime of {}", path.display()))?;
        if latest.as_ref().map_or(true, |(current, _)| modified > *current) {
            latest = Some((modified, path));
        }
    }
    let Some((_, file)) = latest else {
        return Ok(None);
    };

    let markdown = fs::read_to_string(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let html = fs::read_to_string(file.with_extension("html")).await.ok();
    let week = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Some(Digest {
        week,
        markdown,
        html,
        file,
    }))
}

pub fn email_subject(config: &EmailConfig, week: &str) -> String {
    format!("{} Weekly Digest - {week}", config.subject_prefix).trim_start().to_string()
}

/// Stored HTML when present, otherwise the markdown in a `<pre>` block.
pub fn email_body(digest: &Digest) -> String {
    match &digest.html {
        Some(html) => html.clone(),
        None => format!("<pre>{}</pre>", digest.markdown),
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
        address: address.to_string(),
        message: e.to_string(),
    })
}

pub fn build_email(config: &EmailConfig, digest: &Digest) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(mailbox(&config.from_email)?)
        .subject(email_subject(config, &digest.week));
    for recipient in &config.recipients {
        builder = builder.to(mailbox(recipient)?);
    }
    Ok(builder.header(header::ContentType::TEXT_HTML).body(email_body(digest))?)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn slack_digest_payload(digest: &Digest, today: NaiveDate) -> Value {
    let summary = digest
        .markdown
        .split('\n')
        .take(SLACK_SUMMARY_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    json!({
        "text": format!("📚 Weekly AI Thought Leadership Digest - {}", digest.week),
        "blocks": [
            {
                "type": "header",
                "text": {"type": "plain_text", "text": format!("📚 Weekly Digest - {}", digest.week)}
            },
            {
                "type": "section",
                "text": {"type": "mrkdwn", "text": truncate(&summary, SLACK_SECTION_LIMIT)}
            },
            {
                "type": "context",
                "elements": [
                    {"type": "mrkdwn", "text": format!("{FOOTER} • {}", today.format("%Y-%m-%d"))}
                ]
            }
        ]
    })
}

/// Short message naming up to five newly ingested files. `None` when empty.
pub fn new_posts_payload(files: &[PathBuf]) -> Option<Value> {
    if files.is_empty() {
        return None;
    }
    let mut text = format!("🆕 {} new post(s) added to AI Thought Leadership KB:\n\n", files.len());
    for file in files.iter().take(NEW_POSTS_LISTED) {
        text.push_str(&format!("• {}\n", file.display()));
    }
    Some(json!({ "text": truncate(&text, SLACK_SECTION_LIMIT) }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub email: DeliveryStatus,
    pub slack: DeliveryStatus,
}

/// Delivers digests over SMTP and a Slack incoming webhook. Never retries.
pub struct Notifier {
    config: NotificationConfig,
    http: reqwest::Client,
    smtp_password: Option<String>,
    slack_webhook: Option<String>,
}

impl Notifier {
    pub fn new(config: NotificationConfig, smtp_password: Option<String>, slack_webhook: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building webhook client")?;
        Ok(Self {
            config,
            http,
            smtp_password: smtp_password.filter(|v| !v.is_empty()),
            slack_webhook: slack_webhook.filter(|v| !v.is_empty()),
        })
    }

    /// Secrets from `SENDGRID_API_KEY` (or `SMTP_PASSWORD`) and `SLACK_WEBHOOK_URL`.
    pub fn from_env(config: NotificationConfig) -> Result<Self> {
        let password = std::env::var("SENDGRID_API_KEY")
            .or_else(|_| std::env::var("SMTP_PASSWORD"))
            .ok();
        Self::new(config, password, std::env::var("SLACK_WEBHOOK_URL").ok())
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    pub async fn send_digest(&self, digest: &Digest) -> NotificationReport {
        if !self.config.enabled {
            info!("notifications disabled");
            return NotificationReport {
                email: DeliveryStatus::Disabled,
                slack: DeliveryStatus::Disabled,
            };
        }
        NotificationReport {
            email: self.send_email(digest).await,
            slack: self.send_slack_digest(digest).await,
        }
    }

    pub async fn send_email(&self, digest: &Digest) -> DeliveryStatus {
        let config = &self.config.email;
        if !config.enabled {
            info!("email notifications disabled");
            return DeliveryStatus::Disabled;
        }
        let Some(password) = self.smtp_password.clone() else {
            warn!("SENDGRID_API_KEY not set; skipping email");
            return DeliveryStatus::NotConfigured;
        };
        if config.recipients.is_empty() {
            warn!("no email recipients configured");
            return DeliveryStatus::NotConfigured;
        }

        match self.deliver_email(config, digest, password).await {
            Ok(()) => {
                info!(recipients = %config.recipients.join(", "), "email sent");
                DeliveryStatus::Sent
            }
            Err(err) => {
                warn!(error = %err, "email failed");
                DeliveryStatus::Failed
            }
        }
    }

    async fn deliver_email(&self, config: &EmailConfig, digest: &Digest, password: String) -> Result<(), NotifyError> {
        let message = build_email(config, digest)?;
        let transport = SmtpTransport::relay(&config.smtp_host)?
            .credentials(Credentials::new(config.smtp_username.clone(), password))
            .build();
        tokio::task::spawn_blocking(move || transport.send(&message)).await??;
        Ok(())
    }

    pub async fn send_slack_digest(&self, digest: &Digest) -> DeliveryStatus {
        if !self.config.slack.enabled {
            info!("slack notifications disabled");
            return DeliveryStatus::Disabled;
        }
        let payload = slack_digest_payload(digest, Utc::now().date_naive());
        self.post_slack(&payload).await
    }

    /// Announce newly ingested files on Slack when it is enabled.
    pub async fn notify_new_posts(&self, files: &[PathBuf]) -> DeliveryStatus {
        if !self.config.enabled || !self.config.slack.enabled {
            return DeliveryStatus::Disabled;
        }
        let Some(payload) = new_posts_payload(files) else {
            return DeliveryStatus::Disabled;
        };
        self.post_slack(&payload).await
    }

    async fn post_slack(&self, payload: &Value) -> DeliveryStatus {
        let Some(webhook) = self.slack_webhook.as_deref() else {
            warn!("SLACK_WEBHOOK_URL not set; skipping slack");
            return DeliveryStatus::NotConfigured;
        };
        match self.post_webhook(webhook, payload).await {
            Ok(()) => {
                info!(channel = %self.config.slack.channel, "slack notification sent");
                DeliveryStatus::Sent
            }
            Err(err) => {
                warn!(error = %err, "slack notification failed");
                DeliveryStatus::Failed
            }
        }
    }

    async fn post_webhook(&self, webhook: &str, payload: &Value) -> Result<(), NotifyError> {
        let response = self.http.post(webhook).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::WebhookStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(markdown: &str, html: Option<&str>) -> Digest {
        Digest {
            week: "2025-W10".into(),
            markdown: markdown.into(),
            html: html.map(str::to_string),
            file: PathBuf::from("2025-W10.md"),
        }
    }

    fn fixture_config() -> NotificationConfig {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/notifications.yaml");
        NotificationConfig::load(path).unwrap()
    }

    #[test]
    fn config_file_parses_with_defaults() {
        let config = fixture_config();
        assert!(config.enabled);
        assert_eq!(config.email.subject_prefix, "[TLKB]");
        assert_eq!(config.email.smtp_host, "smtp.sendgrid.net");
        assert_eq!(config.slack.channel, "#ai-reading");

        let minimal = NotificationConfig::from_yaml_str("notifications:\n  enabled: true\n").unwrap();
        assert_eq!(minimal.email, EmailConfig::default());
        assert_eq!(minimal.slack.channel, "#general");
    }

    #[test]
    fn email_prefers_stored_html() {
        assert_eq!(email_body(&digest("# md", Some("<h1>md</h1>"))), "<h1>md</h1>");
        assert_eq!(email_body(&digest("# md", None)), "<pre># md</pre>");
        let config = fixture_config();
        assert_eq!(email_subject(&config.email, "2025-W10"), "[TLKB] Weekly Digest - 2025-W10");
        assert_eq!(email_subject(&EmailConfig::default(), "2025-W10"), "Weekly Digest - 2025-W10");
    }

    #[test]
    fn email_message_rejects_bad_addresses() {
        let mut config = fixture_config().email;
        assert!(build_email(&config, &digest("# md", None)).is_ok());
        config.recipients.push("not an address".into());
        assert!(matches!(
            build_email(&config, &digest("# md", None)),
            Err(NotifyError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn slack_payload_keeps_first_ten_lines() {
        let markdown = (1..=15).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let payload = slack_digest_payload(&digest(&markdown, None), NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
        let section = payload["blocks"][1]["text"]["text"].as_str().unwrap();
        assert!(section.ends_with("line 10"));
        assert!(!section.contains("line 11"));
        assert_eq!(payload["blocks"][0]["text"]["text"], "📚 Weekly Digest - 2025-W10");
        assert!(payload["blocks"][2]["elements"][0]["text"].as_str().unwrap().ends_with("2025-03-12"));

        let long = "x".repeat(5000);
        let payload = slack_digest_payload(&digest(&long, None), NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
        assert_eq!(payload["blocks"][1]["text"]["text"].as_str().unwrap().len(), SLACK_SECTION_LIMIT);
    }

    #[test]
    fn new_posts_message_lists_five() {
        assert!(new_posts_payload(&[]).is_none());
        let files: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("p{i}.md"))).collect();
        let payload = new_posts_payload(&files).unwrap();
        let text = payload["text"].as_str().unwrap();
        assert!(text.starts_with("🆕 7 new post(s)"));
        assert!(text.contains("• p4.md"));
        assert!(!text.contains("p5.md"));
    }

    #[tokio::test]
    async fn missing_secrets_are_reported_not_sent() {
        let mut config = fixture_config();
        config.email.enabled = true;
        config.slack.enabled = true;
        let notifier = Notifier::new(config, None, None).unwrap();
        let report = notifier.send_digest(&digest("# md", None)).await;
        assert_eq!(report.email, DeliveryStatus::NotConfigured);
        assert_eq!(report.slack, DeliveryStatus::NotConfigured);

        let mut disabled = fixture_config();
        disabled.enabled = false;
        let notifier = Notifier::new(disabled, Some("key".into()), Some("http://hook".into())).unwrap();
        assert_eq!(notifier.send_digest(&digest("# md", None)).await.email, DeliveryStatus::Disabled);
    }

    #[tokio::test]
    async fn latest_digest_is_picked_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2025-W09.md"), "old").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(dir.path().join("2025-W10.md"), "new").unwrap();
        std::fs::write(dir.path().join("2025-W10.html"), "<p>new</p>").unwrap();

        let latest = load_latest_digest(dir.path()).await.unwrap().unwrap();
        assert_eq!(latest.week, "2025-W10");
        assert_eq!(latest.markdown, "new");
        assert_eq!(latest.html.as_deref(), Some("<p>new</p>"));

        let empty = tempfile::tempdir().unwrap();
        assert!(load_latest_digest(empty.path()).await.unwrap().is_none());
    }
}
