//! The research stages: planner, search, selector, scraper, reporter,
//! reviewer, router, and final report.
//!
//! Every stage takes its configuration and collaborator handles at
//! construction and appends exactly one entry to its own channel per run
//! (the final-report stage also sets the terminal flag).

use serde_json::Value;

use sleuth_llm::{ChatMessage, DynProvider, Request};
use sleuth_types::{channels, Message, ResearchConfig, Result, SleuthError, StateRecord};

use crate::retry::{call_with_retry, CallPolicy};

pub mod final_report;
pub mod planner;
pub mod reporter;
pub mod reviewer;
pub mod router;
pub mod scraper;
pub mod search;
pub mod selector;

pub use final_report::FinalReportStage;
pub use planner::PlannerStage;
pub use reporter::ReporterStage;
pub use reviewer::ReviewerStage;
pub use router::RouterStage;
pub use scraper::ScrapeStage;
pub use search::SearchStage;
pub use selector::SelectorStage;

/// Registered names of the research stages.
pub mod names {
    pub const START: &str = "start";
    pub const PLANNER: &str = "planner";
    pub const SERPER: &str = "serper";
    pub const SELECTOR: &str = "selector";
    pub const SCRAPER: &str = "scraper";
    pub const REPORTER: &str = "reporter";
    pub const REVIEWER: &str = "reviewer";
    pub const ROUTER: &str = "router";
    pub const FINAL_REPORT: &str = "final_report";
}

/// Model and call settings shared by the model-backed stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub model: String,
    pub temperature: f32,
    pub stop: Vec<String>,
    pub call: CallPolicy,
}

impl StageSettings {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            model: config.model.model.clone(),
            temperature: config.model.temperature,
            stop: config.model.stop.clone(),
            call: CallPolicy::from_config(&config.calls),
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self::from_config(&ResearchConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// One model call: system prompt plus the research question as the user turn.
pub(crate) async fn generate(
    provider: &DynProvider,
    settings: &StageSettings,
    stage: &str,
    system: String,
    question: &str,
    json: bool,
) -> Result<String> {
    let mut request = Request::new(
        settings.model.clone(),
        vec![
            ChatMessage::system(system),
            ChatMessage::user(format!("research question: {question}")),
        ],
    )
    .with_temperature(settings.temperature)
    .with_stop(settings.stop.clone());
    if json {
        request = request.json();
    }

    let response = call_with_retry(stage, &settings.call, || provider.complete(&request)).await?;
    Ok(response.text)
}

/// Wrap model output: a decodable document is stored structured, anything
/// else is kept as text.
pub(crate) fn model_entry(text: String) -> Message {
    match Message::new(text.as_str()).decode() {
        Ok(doc) => Message::new(Value::Object(doc)),
        Err(e) => {
            tracing::debug!(error = %e, "Model output is not a document, keeping as text");
            Message::text(text)
        }
    }
}

pub(crate) fn failure(stage: &str, err: &SleuthError) -> Message {
    tracing::warn!(stage, error = %err, "Stage call failed");
    Message::from_error(err).with_metadata("stage", stage)
}

pub(crate) fn missing_input(stage: &str, what: &str) -> Message {
    tracing::warn!(stage, missing = what, "Upstream input missing");
    Message::error("missing_input", format!("{stage}: no {what} available"))
        .with_metadata("stage", stage)
}

/// Latest reviewer feedback, or empty when there is none.
pub(crate) fn latest_feedback(state: &StateRecord) -> String {
    match state.last(channels::REVIEWER) {
        Some(entry) if !entry.is_error() => entry
            .str_field("feedback")
            .unwrap_or_else(|| entry.as_text()),
        _ => String::new(),
    }
}

pub(crate) fn report_text(entry: &Message) -> String {
    entry.str_field("report").unwrap_or_else(|| entry.as_text())
}

pub(crate) fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub(crate) fn or_none(text: String) -> String {
    if text.trim().is_empty() {
        "None".to_string()
    } else {
        text
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
