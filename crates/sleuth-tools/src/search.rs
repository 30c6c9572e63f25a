//! Web search: query in, ranked results out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use sleuth_types::{Result, SleuthError};

/// One organic search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl SearchResult {
    /// Build from a loosely-shaped JSON hit, filling in placeholders for
    /// missing fields.
    pub fn from_json(hit: &serde_json::Value) -> Self {
        Self {
            title: hit["title"].as_str().unwrap_or("No Title").to_string(),
            link: hit["link"].as_str().unwrap_or("#").to_string(),
            snippet: hit["snippet"]
                .as_str()
                .unwrap_or("No snippet available.")
                .to_string(),
        }
    }
}

/// A web-search backend. An empty result list is a normal outcome.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
    fn name(&self) -> &str;
}

/// Render results as the plain-text block shown to the selector model.
pub fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "Title: {}\nLink: {}\nSnippet: {}\n---",
                r.title, r.link, r.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// SerperSearch
// ---------------------------------------------------------------------------

/// Google results via the Serper API.
pub struct SerperSearch {
    api_key: String,
    endpoint: String,
    http: reqwest::Client,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://google.serper.dev/search".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("SERPER_API_KEY").map_err(|_| SleuthError::AuthError {
            provider: "serper".into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn error(&self, message: impl Into<String>) -> SleuthError {
        SleuthError::SearchError {
            provider: "serper".into(),
            message: message.into(),
        }
    }
}

/// Pull the `organic` hits out of a Serper response body.
fn parse_organic(body: &serde_json::Value) -> Vec<SearchResult> {
    body["organic"]
        .as_array()
        .map(|hits| hits.iter().map(SearchResult::from_json).collect())
        .unwrap_or_default()
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        tracing::debug!(endpoint = %self.endpoint, %query, "Sending search request");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query }))
            .send()
            .await
            .map_err(|e| self.error(format!("request error occurred: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SleuthError::AuthError {
                provider: "serper".into(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SleuthError::RateLimited {
                provider: "serper".into(),
                retry_after_ms: 1000,
            });
        }
        if !status.is_success() {
            return Err(self.error(format!("HTTP error occurred: {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.error(format!("error processing data: {e}")))?;

        let results = parse_organic(&body);
        if results.is_empty() {
            tracing::info!(%query, "No organic results found");
        }
        Ok(results)
    }

    fn name(&self) -> &str {
        "serper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_organic_fills_placeholders() {
        let body = json!({
            "organic": [
                {"title": "Paris - Wikipedia", "link": "https://en.wikipedia.org/wiki/Paris", "snippet": "Paris is the capital"},
                {"link": "https://example.test"}
            ]
        });
        let results = parse_organic(&body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Paris - Wikipedia");
        assert_eq!(results[1].title, "No Title");
        assert_eq!(results[1].snippet, "No snippet available.");
    }

    #[test]
    fn parse_organic_missing_is_empty() {
        assert!(parse_organic(&json!({"knowledgeGraph": {}})).is_empty());
    }

    #[test]
    fn format_results_renders_blocks() {
        let results = vec![SearchResult {
            title: "T".into(),
            link: "L".into(),
            snippet: "S".into(),
        }];
        assert_eq!(format_results(&results), "Title: T\nLink: L\nSnippet: S\n---");
        assert_eq!(format_results(&[]), "");
    }

    #[test]
    fn from_json_defaults_link() {
        let r = SearchResult::from_json(&json!({}));
        assert_eq!(r.link, "#");
    }
}
