use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use md5::{Digest, Md5};

/// Hex characters kept from the URL digest.
pub const IDENTITY_TOKEN_LEN: usize = 8;
pub const SLUG_MAX_CHARS: usize = 60;

static RE_SLUG_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static RE_SLUG_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

/// Short stable identifier for a URL: the leading hex of its MD5 digest.
/// Shared with `url_hash` in the article store.
pub fn identity_token(url: &str) -> String {
    let mut token = hex::encode(Md5::digest(url.as_bytes()));
    token.truncate(IDENTITY_TOKEN_LEN);
    token
}

pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = RE_SLUG_STRIP.replace_all(&lowered, "");
    let collapsed = RE_SLUG_COLLAPSE.replace_all(&stripped, "-");
    collapsed.chars().take(SLUG_MAX_CHARS).collect()
}

/// `YYYY-MM-DD-<slug>-<token>.md`, sortable by date and unique per URL.
pub fn article_file_name(date: NaiveDate, title: &str, url: &str) -> String {
    format!(
        "{}-{}-{}.md",
        date.format("%Y-%m-%d"),
        slugify(title),
        identity_token(url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_deterministic_and_fixed_length() {
        for url in [
            "",
            "https://example.com/post",
            "https://例え.jp/ブログ/記事?q=ü",
            &"x".repeat(10_000),
        ] {
            let token = identity_token(url);
            assert_eq!(token.len(), IDENTITY_TOKEN_LEN, "{url:?}");
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(token, identity_token(url));
        }
    }

    #[test]
    fn token_matches_md5_prefix() {
        // md5("hello world") = 5eb63bbbe01eeed093cb22bb8f5acdc3
        assert_eq!(identity_token("hello world"), "5eb63bbb");
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(identity_token(""), "d41d8cd9");
    }

    #[test]
    fn distinct_urls_get_distinct_tokens_in_practice() {
        // Only 32 bits survive truncation; collisions are possible but rare.
        let a = identity_token("https://example.com/a");
        let b = identity_token("https://example.com/b");
        assert_ne!(a, b);
    }

    #[test]
    fn slug_strips_punctuation_and_collapses_separators() {
        assert_eq!(slugify("Claude Code vs. Cursor: My Experience!"), "claude-code-vs-cursor-my-experience");
        assert_eq!(slugify("a  -- b"), "a-b");
        assert_eq!(slugify("Ünïcode Wörds"), "ünïcode-wörds");
    }

    #[test]
    fn slug_is_capped() {
        let slug = slugify(&"word ".repeat(40));
        assert_eq!(slug.chars().count(), SLUG_MAX_CHARS);
    }

    #[test]
    fn file_name_encodes_date_slug_and_token() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
        let name = article_file_name(date, "Hello, World", "https://example.com/p");
        assert_eq!(
            name,
            format!("2025-01-07-hello-world-{}.md", identity_token("https://example.com/p"))
        );
    }
}
