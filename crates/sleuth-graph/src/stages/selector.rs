use async_trait::async_trait;

use sleuth_llm::DynProvider;
use sleuth_tools::{format_results, SearchResult};
use sleuth_types::{channels, Patch, StateRecord};

use super::{
    failure, generate, latest_feedback, missing_input, model_entry, names, now, or_none,
    StageSettings,
};
use crate::prompts;
use crate::stage::Stage;

/// Picks one page from the latest search results.
pub struct SelectorStage {
    provider: DynProvider,
    settings: StageSettings,
}

impl SelectorStage {
    pub fn new(provider: DynProvider, settings: StageSettings) -> Self {
        Self { provider, settings }
    }
}

/// Rendered results page, or `None` when there is nothing to choose from.
fn results_page(state: &StateRecord) -> Option<String> {
    let entry = state.last(channels::SERPER).filter(|e| !e.is_error())?;
    match entry.field("results").map(serde_json::from_value::<Vec<SearchResult>>) {
        Some(Ok(results)) if results.is_empty() => None,
        Some(Ok(results)) => Some(format_results(&results)),
        _ => Some(entry.as_text()),
    }
}

fn previous_selections(state: &StateRecord) -> String {
    state
        .channel(channels::SELECTOR)
        .iter()
        .filter(|e| !e.is_error())
        .filter_map(|e| e.str_field("selected_page_url"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Stage for SelectorStage {
    fn name(&self) -> &str {
        names::SELECTOR
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let Some(serp) = results_page(state) else {
            return Patch::new().append(
                channels::SELECTOR,
                missing_input(self.name(), "search results"),
            );
        };

        let feedback = latest_feedback(state);
        let previous = or_none(previous_selections(state));
        let system = prompts::render(
            prompts::SELECTOR,
            &[
                ("serp", &serp),
                ("feedback", &feedback),
                ("previous_selections", &previous),
                ("datetime", &now()),
            ],
        );

        let entry = match generate(
            &self.provider,
            &self.settings,
            self.name(),
            system,
            state.research_question(),
            true,
        )
        .await
        {
            Ok(text) => model_entry(text),
            Err(e) => failure(self.name(), &e),
        };
        Patch::new().append(channels::SELECTOR, entry)
    }
}
