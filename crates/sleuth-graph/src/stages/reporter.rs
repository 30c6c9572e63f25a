use async_trait::async_trait;
use serde_json::{json, Value};

use sleuth_llm::DynProvider;
use sleuth_types::{channels, scalars, Message, Patch, StateRecord};

use super::{
    failure, generate, latest_feedback, missing_input, names, now, or_none, report_text,
    StageSettings,
};
use crate::prompts;
use crate::stage::Stage;

/// Drafts a cited answer from the latest scraped page.
///
/// A scraper diagnostic still counts as input: the report is written from
/// whatever the scraper recorded, so one failed fetch never halts the run.
pub struct ReporterStage {
    provider: DynProvider,
    settings: StageSettings,
}

impl ReporterStage {
    pub fn new(provider: DynProvider, settings: StageSettings) -> Self {
        Self { provider, settings }
    }

    fn annotate(&self, entry: Message, state: &StateRecord) -> Message {
        let selected_url = state
            .last(channels::SELECTOR)
            .and_then(|e| e.str_field("selected_page_url"))
            .map(Value::String)
            .unwrap_or(Value::Null);
        let has_serp = state
            .last(channels::SERPER)
            .is_some_and(|e| !e.is_error());
        let has_scraper = state
            .last(channels::SCRAPER)
            .is_some_and(|e| !e.is_error());

        entry
            .with_metadata(scalars::RESEARCH_QUESTION, state.research_question())
            .with_metadata("selected_url", selected_url)
            .with_metadata("has_serp", has_serp)
            .with_metadata("has_scraper", has_scraper)
    }
}

fn previous_reports(state: &StateRecord) -> String {
    state
        .channel(channels::REPORTER)
        .iter()
        .filter(|e| !e.is_error())
        .map(report_text)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[async_trait]
impl Stage for ReporterStage {
    fn name(&self) -> &str {
        names::REPORTER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let Some(research) = state.last(channels::SCRAPER) else {
            let entry = missing_input(self.name(), "research from the scraper");
            return Patch::new().append(channels::REPORTER, self.annotate(entry, state));
        };

        let research = research.as_text();
        let feedback = latest_feedback(state);
        let previous = or_none(previous_reports(state));
        let system = prompts::render(
            prompts::REPORTER,
            &[
                ("research", &research),
                ("feedback", &feedback),
                ("previous_reports", &previous),
                ("datetime", &now()),
            ],
        );

        let entry = match generate(
            &self.provider,
            &self.settings,
            self.name(),
            system,
            state.research_question(),
            false,
        )
        .await
        {
            Ok(text) => Message::new(json!({ "report": text })),
            Err(e) => failure(self.name(), &e),
        };
        Patch::new().append(channels::REPORTER, self.annotate(entry, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{settings, ScriptedProvider};
    use std::sync::Arc;

    fn state_with_scrape(entry: Message) -> StateRecord {
        let mut state = StateRecord::new();
        state.apply(
            Patch::new()
                .set_scalar(scalars::RESEARCH_QUESTION, "What is the capital of France?")
                .append(
                    channels::SERPER,
                    Message::new(json!({"results": []})),
                )
                .append(
                    channels::SELECTOR,
                    Message::new(json!({"selected_page_url": "https://example.test/paris"})),
                )
                .append(channels::SCRAPER, entry),
        );
        state
    }

    #[tokio::test]
    async fn report_carries_metadata() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            "Paris [1]\n\nSources:\n[1] https://example.test/paris".into(),
        )]));
        let stage = ReporterStage::new(DynProvider::from_arc(provider.clone()), settings());

        let state = state_with_scrape(Message::new(json!({
            "source": "https://example.test/paris",
            "content": "Paris is the capital of France."
        })));
        let patch = stage.process(&state).await;
        let entry = &patch.appends[channels::REPORTER][0];

        assert!(entry.str_field("report").unwrap().starts_with("Paris [1]"));
        assert_eq!(entry.metadata["research_question"], json!("What is the capital of France?"));
        assert_eq!(entry.metadata["selected_url"], json!("https://example.test/paris"));
        assert_eq!(entry.metadata["has_serp"], json!(true));
        assert_eq!(entry.metadata["has_scraper"], json!(true));

        let seen = provider.seen.lock().unwrap();
        assert!(!seen[0].json_output);
        assert!(seen[0].messages[0].content.contains("Paris is the capital of France."));
    }

    #[tokio::test]
    async fn page_text_with_braces_reaches_prompt_verbatim() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("Paris.".into())]));
        let stage = ReporterStage::new(DynProvider::from_arc(provider.clone()), settings());

        let mut state = state_with_scrape(Message::new(json!({
            "source": "https://example.test/templates",
            "content": "Write {feedback} and {datetime} in your template."
        })));
        state.apply(Patch::new().append(
            channels::REVIEWER,
            Message::new(json!({"feedback": "cite more sources"})),
        ));
        stage.process(&state).await;

        let seen = provider.seen.lock().unwrap();
        let system = &seen[0].messages[0].content;
        assert!(system.contains("Write {feedback} and {datetime} in your template."));
        assert!(system.contains("Feedback: cite more sources"));
    }

    #[tokio::test]
    async fn scraper_sentinel_still_produces_report() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            "The page could not be read.".into(),
        )]));
        let stage = ReporterStage::new(DynProvider::from_arc(provider.clone()), settings());

        let state = state_with_scrape(Message::error(
            "access_denied",
            "error in scraping website, 403 Forbidden for url: https://example.test/paris",
        ));
        let patch = stage.process(&state).await;
        let entry = &patch.appends[channels::REPORTER][0];

        assert!(!entry.is_error());
        assert_eq!(entry.metadata["has_scraper"], json!(false));
        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].messages[0].content.contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn no_research_is_missing_input() {
        let stage = ReporterStage::new(
            DynProvider::new(ScriptedProvider::new(Vec::new())),
            settings(),
        );
        let patch = stage.process(&StateRecord::new()).await;
        let entry = &patch.appends[channels::REPORTER][0];
        assert_eq!(entry.error_kind(), Some("missing_input"));
        assert_eq!(entry.metadata["selected_url"], Value::Null);
    }
}
