use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sleuth_tools::{ScrapeOutcome, Scraper};
use sleuth_types::{channels, Message, Patch, SleuthError, StateRecord};

use super::{failure, missing_input, names};
use crate::stage::Stage;

/// Fetches the page picked by the selector.
///
/// Scraper sentinels (access denied, garbled text, fetch failure) become
/// diagnostic entries whose content is the sentinel text, so the reporter
/// can still see what went wrong.
pub struct ScrapeStage {
    scraper: Arc<dyn Scraper>,
    timeout: Duration,
}

impl ScrapeStage {
    pub fn new(scraper: Arc<dyn Scraper>, timeout: Duration) -> Self {
        Self { scraper, timeout }
    }
}

#[async_trait]
impl Stage for ScrapeStage {
    fn name(&self) -> &str {
        names::SCRAPER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let url = state
            .last(channels::SELECTOR)
            .filter(|entry| !entry.is_error())
            .and_then(|entry| entry.str_field("selected_page_url"))
            .filter(|url| !url.trim().is_empty());

        let Some(url) = url else {
            return Patch::new().append(
                channels::SCRAPER,
                missing_input(self.name(), "selected page URL"),
            );
        };

        tracing::info!(stage = self.name(), %url, "Fetching page");
        let entry = match tokio::time::timeout(self.timeout, self.scraper.fetch(&url)).await {
            Ok(ScrapeOutcome::Page { text }) => {
                Message::new(json!({ "source": url, "content": text }))
            }
            Ok(outcome) => {
                let kind = outcome.error_kind().unwrap_or("fetch_failed");
                tracing::warn!(stage = self.name(), %url, kind, "Scrape returned a sentinel");
                Message::error(kind, outcome.describe(&url))
                    .with_metadata("stage", self.name())
                    .with_metadata("source", url)
            }
            Err(_) => {
                let err = SleuthError::CallTimeout {
                    operation: self.name().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                };
                failure(self.name(), &err).with_metadata("source", url)
            }
        };
        Patch::new().append(channels::SCRAPER, entry)
    }
}
