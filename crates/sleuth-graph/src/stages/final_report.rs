use async_trait::async_trait;
use serde_json::json;

use sleuth_types::{channels, Message, Patch, StateRecord};

use super::{missing_input, names, report_text};
use crate::stage::Stage;

/// Publishes the latest report and raises the terminal flag. No model call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalReportStage;

#[async_trait]
impl Stage for FinalReportStage {
    fn name(&self) -> &str {
        names::FINAL_REPORT
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let report = state
            .last(channels::REPORTER)
            .filter(|e| !e.is_error())
            .map(report_text);

        let entry = match report {
            Some(report) => Message::new(json!({ "report": report })),
            None => missing_input(self.name(), "report to publish"),
        };
        Patch::new()
            .append(channels::FINAL_REPORTS, entry)
            .append(channels::END_CHAIN, Message::new(json!({ "end": true })))
    }
}
