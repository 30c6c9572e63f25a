use async_trait::async_trait;

use sleuth_llm::DynProvider;
use sleuth_types::{channels, Patch, StateRecord};

use super::{failure, generate, latest_feedback, model_entry, names, now, StageSettings};
use crate::prompts;
use crate::stage::Stage;

/// Turns the research question (and any reviewer feedback) into a search plan.
pub struct PlannerStage {
    provider: DynProvider,
    settings: StageSettings,
}

impl PlannerStage {
    pub fn new(provider: DynProvider, settings: StageSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl Stage for PlannerStage {
    fn name(&self) -> &str {
        names::PLANNER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let feedback = latest_feedback(state);
        let system = prompts::render(
            prompts::PLANNER,
            &[("feedback", &feedback), ("datetime", &now())],
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
        Patch::new().append(channels::PLANNER, entry)
    }
}
