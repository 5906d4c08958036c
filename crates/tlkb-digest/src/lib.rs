//! Weekly digests of recently ingested articles and their delivery over
//! email and Slack.

mod digest;
mod notify;

pub use digest::{
    digest_document, digest_email_html, digest_request, find_recent_posts, markdown_to_html, simple_digest,
    week_label, DigestGenerator, DigestOptions, DigestReport,
};
pub use notify::{
    build_email, email_body, email_subject, load_latest_digest, new_posts_payload, slack_digest_payload, DeliveryStatus,
    Digest, EmailConfig, NotificationConfig, NotificationReport, Notifier, NotifyError, SlackConfig,
    NEW_POSTS_LISTED, SLACK_SECTION_LIMIT, SLACK_SUMMARY_LINES,
};

pub const CRATE_NAME: &str = "tlkb-digest";
