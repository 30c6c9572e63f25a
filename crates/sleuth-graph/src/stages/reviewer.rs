use async_trait::async_trait;

use sleuth_llm::DynProvider;
use sleuth_types::{channels, Patch, StateRecord};

use super::{
    failure, generate, latest_feedback, missing_input, model_entry, names, now, report_text,
    StageSettings,
};
use crate::prompts;
use crate::stage::Stage;

/// Grades the latest report and writes feedback for the next iteration.
pub struct ReviewerStage {
    provider: DynProvider,
    settings: StageSettings,
}

impl ReviewerStage {
    pub fn new(provider: DynProvider, settings: StageSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl Stage for ReviewerStage {
    fn name(&self) -> &str {
        names::REVIEWER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let Some(report) = state.last(channels::REPORTER).filter(|e| !e.is_error()) else {
            return Patch::new().append(
                channels::REVIEWER,
                missing_input(self.name(), "report to review"),
            );
        };

        let report = report_text(report);
        let feedback = latest_feedback(state);
        let summary = serde_json::to_string(&state.channel_lengths()).unwrap_or_default();
        let system = prompts::render(
            prompts::REVIEWER,
            &[
                ("reporter", &report),
                ("feedback", &feedback),
                ("state", &summary),
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
        Patch::new().append(channels::REVIEWER, entry)
    }
}
