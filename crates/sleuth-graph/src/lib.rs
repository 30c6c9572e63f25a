//! Stage graph builder, routers, executor, and the research stages.
//!
//! This crate implements the Sleuth orchestration engine: graph assembly and
//! build-time validation, conditional routing over the state record, the
//! bounded executor loop, and the canonical research graph built from the
//! generation, search, and scraper collaborators.

pub mod engine;
pub mod events;
pub mod graph;
pub mod prompts;
pub mod research;
pub mod retry;
pub mod router;
pub mod stage;
pub mod stages;

pub use engine::{run, ExecutorState, Executor, RunConfig, RunResult, Termination};
pub use events::{EventEmitter, RunEvent};
pub use graph::{GraphBuilder, Outgoing, StageGraph, END};
pub use research::{build_research_graph, research_overrides, research_router, Collaborators};
pub use retry::{call_with_retry, BackoffPolicy, CallPolicy};
pub use router::{ChannelRouter, Route, Router};
pub use stage::{DynStage, FnStage, Stage, StartStage};
pub use stages::StageSettings;
