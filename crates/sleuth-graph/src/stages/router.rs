use async_trait::async_trait;

use sleuth_llm::DynProvider;
use sleuth_types::{channels, Patch, StateRecord};

use super::{failure, generate, missing_input, model_entry, names, StageSettings};
use crate::prompts;
use crate::stage::Stage;

/// Turns the reviewer's verdict into a `{next_agent, reason}` decision.
///
/// This stage only records the decision; the conditional edge after it reads
/// the decision back out of `router_response`.
pub struct RouterStage {
    provider: DynProvider,
    settings: StageSettings,
}

impl RouterStage {
    pub fn new(provider: DynProvider, settings: StageSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl Stage for RouterStage {
    fn name(&self) -> &str {
        names::ROUTER
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let Some(review) = state.last(channels::REVIEWER).filter(|e| !e.is_error()) else {
            return Patch::new().append(
                channels::ROUTER,
                missing_input(self.name(), "reviewer verdict"),
            );
        };

        let verdict = review.as_text();
        let system = prompts::render(prompts::ROUTER, &[("feedback", &verdict)]);

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
        Patch::new().append(channels::ROUTER, entry)
    }
}
