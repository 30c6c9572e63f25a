//! The canonical research graph.
//!
//! ```text
//! start -> planner -> serper -> selector -> scraper -> reporter -> reviewer -> router
//! router ~> planner | selector | reporter | final_report | end   (router_response.next_agent)
//! final_report -> end
//! ```

use std::sync::Arc;

use sleuth_llm::DynProvider;
use sleuth_tools::{Scraper, SearchProvider};
use sleuth_types::{channels, scalars, Patch, Result};

use crate::graph::{GraphBuilder, StageGraph, END};
use crate::router::ChannelRouter;
use crate::stage::StartStage;
use crate::stages::{
    names, FinalReportStage, PlannerStage, ReporterStage, ReviewerStage, RouterStage,
    ScrapeStage, SearchStage, SelectorStage, StageSettings,
};

/// Decision key the router stage writes and the conditional edge reads.
pub const DECISION_KEY: &str = "next_agent";

/// External collaborators shared by the research stages.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: DynProvider,
    pub search: Arc<dyn SearchProvider>,
    pub scraper: Arc<dyn Scraper>,
}

/// The conditional edge after the router stage.
pub fn research_router() -> ChannelRouter {
    ChannelRouter::new(channels::ROUTER, DECISION_KEY).with_targets([
        names::PLANNER,
        names::SELECTOR,
        names::REPORTER,
        names::FINAL_REPORT,
        END,
    ])
}

pub fn build_research_graph(collaborators: Collaborators, settings: StageSettings) -> Result<StageGraph> {
    let Collaborators {
        provider,
        search,
        scraper,
    } = collaborators;
    let call = settings.call.clone();

    let mut builder = GraphBuilder::new();
    builder.add(StartStage::new())?;
    builder.add(PlannerStage::new(provider.clone(), settings.clone()))?;
    builder.add(SearchStage::new(search, call.clone()))?;
    builder.add(SelectorStage::new(provider.clone(), settings.clone()))?;
    builder.add(ScrapeStage::new(scraper, call.timeout))?;
    builder.add(ReporterStage::new(provider.clone(), settings.clone()))?;
    builder.add(ReviewerStage::new(provider.clone(), settings.clone()))?;
    builder.add(RouterStage::new(provider, settings))?;
    builder.add(FinalReportStage)?;

    let chain = [
        names::START,
        names::PLANNER,
        names::SERPER,
        names::SELECTOR,
        names::SCRAPER,
        names::REPORTER,
        names::REVIEWER,
        names::ROUTER,
    ];
    for pair in chain.windows(2) {
        builder.add_edge(pair[0], pair[1])?;
    }
    builder.add_conditional_edge(names::ROUTER, research_router())?;
    builder.add_edge(names::FINAL_REPORT, END)?;
    builder.set_entry(names::START)?;

    builder.build()
}

/// Caller overrides for one research run.
pub fn research_overrides(
    question: &str,
    tenant_id: Option<&str>,
    session_id: Option<&str>,
) -> Patch {
    let mut patch = Patch::new().set_scalar(scalars::RESEARCH_QUESTION, question);
    if let Some(tenant) = tenant_id {
        patch = patch.set_scalar(scalars::TENANT_ID, tenant);
    }
    if let Some(session) = session_id {
        patch = patch.set_scalar(scalars::SESSION_ID, session);
    }
    patch
}
