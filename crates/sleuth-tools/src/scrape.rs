//! Page scraping: URL in, extracted text (or a failure sentinel) out.
//!
//! A scraper never returns an error. Every failure is a [`ScrapeOutcome`]
//! value that the calling stage records as a diagnostic entry.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use sleuth_types::{Result, ScraperConfig, SleuthError};

/// Result of fetching one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Page { text: String },
    /// The server refused access (HTTP 403).
    AccessDenied,
    /// The extracted text is mostly non-ASCII noise.
    Garbled,
    Failed { reason: String },
}

impl ScrapeOutcome {
    pub fn is_page(&self) -> bool {
        matches!(self, ScrapeOutcome::Page { .. })
    }

    /// Error kind for diagnostic entries; `None` for a successful page.
    pub fn error_kind(&self) -> Option<&'static str> {
        match self {
            ScrapeOutcome::Page { .. } => None,
            ScrapeOutcome::AccessDenied => Some("access_denied"),
            ScrapeOutcome::Garbled => Some("garbled_content"),
            ScrapeOutcome::Failed { .. } => Some("fetch_failed"),
        }
    }

    /// Human-readable content for the scraper channel.
    pub fn describe(&self, url: &str) -> String {
        match self {
            ScrapeOutcome::Page { text } => text.clone(),
            ScrapeOutcome::AccessDenied => {
                format!("error in scraping website, 403 Forbidden for url: {url}")
            }
            ScrapeOutcome::Garbled => "error in scraping website, garbled text returned".into(),
            ScrapeOutcome::Failed { reason } => format!("error in scraping website, {reason}"),
        }
    }
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch(&self, url: &str) -> ScrapeOutcome;
}

// ---------------------------------------------------------------------------
// HttpScraper
// ---------------------------------------------------------------------------

pub struct HttpScraper {
    http: reqwest::Client,
    max_chars: usize,
}

impl HttpScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SleuthError::Other(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            max_chars: config.max_chars,
        })
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch(&self, url: &str) -> ScrapeOutcome {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ScrapeOutcome::Failed {
                reason: format!("invalid url: {url}"),
            };
        }

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%url, error = %e, "Fetch failed");
                return ScrapeOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return ScrapeOutcome::AccessDenied;
        }
        if !status.is_success() {
            return ScrapeOutcome::Failed {
                reason: format!("HTTP {status} for url: {url}"),
            };
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return ScrapeOutcome::Failed {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        };

        let text = if content_type.contains("html") || body.trim_start().starts_with('<') {
            extract_text_from_html(&body)
        } else {
            collapse_whitespace(&body)
        };

        classify(text, self.max_chars)
    }
}

/// Apply the garbled-text check, then truncate to `max_chars` characters.
fn classify(text: String, max_chars: usize) -> ScrapeOutcome {
    if is_garbled(&text) {
        return ScrapeOutcome::Garbled;
    }
    let text = if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    };
    ScrapeOutcome::Page { text }
}

/// More than 30% non-ASCII characters.
pub fn is_garbled(text: &str) -> bool {
    let total = text.chars().count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    non_ascii as f64 > total as f64 * 0.3
}

// ---------------------------------------------------------------------------
// HTML text extraction
// ---------------------------------------------------------------------------

static HIDDEN_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template)\b[^>]*>.*?</(script|style|noscript|template)\s*>|<!--.*?-->")
        .expect("hidden block pattern is valid")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Visible text of an HTML document, with whitespace runs collapsed to one space.
pub fn extract_text_from_html(html: &str) -> String {
    let without_hidden = HIDDEN_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_hidden, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    collapse_whitespace(&decoded)
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}
