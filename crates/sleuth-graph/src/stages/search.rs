use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use sleuth_tools::SearchProvider;
use sleuth_types::{channels, Message, Patch, StateRecord};

use super::{failure, missing_input, names};
use crate::retry::{call_with_retry, CallPolicy};
use crate::stage::Stage;

/// Runs the planner's search term against the search provider.
pub struct SearchStage {
    search: Arc<dyn SearchProvider>,
    call: CallPolicy,
}

impl SearchStage {
    pub fn new(search: Arc<dyn SearchProvider>, call: CallPolicy) -> Self {
        Self { search, call }
    }
}

#[async_trait]
impl Stage for SearchStage {
    fn name(&self) -> &str {
        names::SERPER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let term = state
            .last(channels::PLANNER)
            .filter(|entry| !entry.is_error())
            .and_then(|entry| entry.str_field("search_term"))
            .filter(|term| !term.trim().is_empty());

        let Some(term) = term else {
            return Patch::new().append(
                channels::SERPER,
                missing_input(self.name(), "search term from the planner"),
            );
        };

        tracing::info!(stage = self.name(), query = %term, provider = self.search.name(), "Searching");
        let entry = match call_with_retry(self.name(), &self.call, || self.search.search(&term)).await
        {
            Ok(results) => {
                let count = results.len();
                Message::new(json!({ "results": results }))
                    .with_metadata("query", term)
                    .with_metadata("result_count", count)
            }
            Err(e) => failure(self.name(), &e).with_metadata("query", term),
        };
        Patch::new().append(channels::SERPER, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::StubSearch;
    use sleuth_tools::SearchResult;
    use sleuth_types::SleuthError;

    fn planned(term: &str) -> StateRecord {
        let mut state = StateRecord::new();
        state.apply(Patch::new().append(
            channels::PLANNER,
            Message::new(json!({ "search_term": term })),
        ));
        state
    }

    fn policy() -> CallPolicy {
        CallPolicy {
            max_retries: 0,
            ..CallPolicy::default()
        }
    }

    #[tokio::test]
    async fn appends_results_with_query() {
        let hit = SearchResult {
            title: "Paris".into(),
            link: "https://example.test/paris".into(),
            snippet: "Capital of France".into(),
        };
        let stage = SearchStage::new(Arc::new(StubSearch(Ok(vec![hit.clone()]))), policy());

        let patch = stage.process(&planned("capital of France")).await;
        let entry = &patch.appends[channels::SERPER][0];
        assert_eq!(entry.content["results"][0]["link"], json!(hit.link));
        assert_eq!(entry.metadata["query"], json!("capital of France"));
        assert_eq!(entry.metadata["result_count"], json!(1));
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let stage = SearchStage::new(Arc::new(StubSearch(Ok(Vec::new()))), policy());
        let patch = stage.process(&planned("obscure")).await;
        let entry = &patch.appends[channels::SERPER][0];
        assert!(!entry.is_error());
        assert_eq!(entry.content["results"], json!([]));
    }

    #[tokio::test]
    async fn missing_plan_is_diagnostic() {
        let stage = SearchStage::new(Arc::new(StubSearch(Ok(Vec::new()))), policy());
        let patch = stage.process(&StateRecord::new()).await;
        assert_eq!(
            patch.appends[channels::SERPER][0].error_kind(),
            Some("missing_input")
        );
    }

    #[tokio::test]
    async fn search_failure_is_diagnostic() {
        let stage = SearchStage::new(
            Arc::new(StubSearch(Err(SleuthError::Other("HTTP error occurred: 500".into())))),
            policy(),
        );
        let patch = stage.process(&planned("x")).await;
        let entry = &patch.appends[channels::SERPER][0];
        assert_eq!(entry.error_kind(), Some("search"));
        assert_eq!(entry.metadata["query"], json!("x"));
    }
}
