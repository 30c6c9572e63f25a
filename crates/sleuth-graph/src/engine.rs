//! Run executor: the core traversal loop.
//!
//! A run seeds a fresh record with the caller's overrides, invokes the entry
//! stage, then repeatedly resolves the next stage through the current stage's
//! outgoing edge set. It stops at the terminal marker, at a stage with no
//! outgoing edges, or when the iteration bound is reached.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use sleuth_types::{channels, Message, Patch, Result, SleuthError, StateRecord};

use crate::events::{EventEmitter, RunEvent};
use crate::graph::{Outgoing, StageGraph};
use crate::router::Route;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration for a run. The iteration bound is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    iteration_bound: usize,
}

impl RunConfig {
    pub fn new(iteration_bound: usize) -> Result<Self> {
        if iteration_bound == 0 {
            return Err(SleuthError::InvalidIterationBound {
                bound: iteration_bound,
            });
        }
        Ok(Self { iteration_bound })
    }

    pub fn iteration_bound(&self) -> usize {
        self.iteration_bound
    }
}

/// Lifecycle of an [`Executor`]. Construction failures never produce an
/// executor; they surface as construction errors from the builder or
/// [`RunConfig::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Ready,
    Running,
    Terminated,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Routing from `from` reached the terminal marker.
    Terminal { from: String },
    /// `from` has no outgoing edges.
    NoOutgoingEdge { from: String },
    /// The step counter reached the iteration bound while another stage was due.
    BoundExceeded { bound: usize },
}

/// The result of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub record: StateRecord,
    /// Stage invocations, the entry stage included.
    pub steps: usize,
    pub visited: Vec<String>,
    pub termination: Termination,
    pub state: ExecutorState,
}

impl RunResult {
    pub fn bound_exceeded(&self) -> bool {
        matches!(self.termination, Termination::BoundExceeded { .. })
    }
}

/// Next hop from the stage that just ran.
enum NextStep {
    Stage(String),
    Terminal,
    NoEdge,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Drives runs over one graph. Each run owns its own record, so independent
/// executors over clones of the same graph may run concurrently.
pub struct Executor {
    graph: Arc<StageGraph>,
    config: RunConfig,
    events: EventEmitter,
    state: ExecutorState,
}

impl Executor {
    pub fn new(graph: StageGraph, config: RunConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            config,
            events: EventEmitter::default(),
            state: ExecutorState::Ready,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Run the graph once. `overrides` seeds the record before the entry stage.
    pub async fn run(&mut self, overrides: Patch) -> RunResult {
        self.state = ExecutorState::Running;
        let bound = self.config.iteration_bound;
        let graph = Arc::clone(&self.graph);

        let mut record = StateRecord::new();
        record.apply(overrides);

        let mut steps = 0usize;
        let mut visited = Vec::new();
        let mut current = graph.entry().to_string();

        tracing::info!(entry = %current, bound, "Run started");
        self.events.emit(RunEvent::RunStarted {
            entry: current.clone(),
            iteration_bound: bound,
        });

        let termination = loop {
            if steps >= bound {
                tracing::warn!(bound, next = %current, "Iteration bound reached, terminating run");
                record.apply(Patch::new().append(
                    channels::DIAGNOSTICS,
                    Message::error(
                        "bound_exceeded",
                        format!("Iteration bound of {bound} reached before stage '{current}' could run"),
                    )
                    .with_metadata("bound", bound)
                    .with_metadata("next_stage", current.clone()),
                ));
                break Termination::BoundExceeded { bound };
            }

            let Some(stage) = graph.stage(&current) else {
                // Unreachable for built graphs: edges and routes are resolved
                // against registered stages.
                tracing::error!(stage = %current, "Stage missing from graph");
                break Termination::Terminal { from: current };
            };

            steps += 1;
            tracing::info!(stage = %current, step = steps, "Stage started");
            self.events.emit(RunEvent::StageStarted {
                stage: current.clone(),
                step: steps,
            });

            let started = Instant::now();
            let patch = stage.process(&record).await;
            let appended = patch.appended_channels();
            record.apply(patch);
            visited.push(current.clone());

            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(stage = %current, step = steps, duration_ms, ?appended, "Stage completed");
            self.events.emit(RunEvent::StageCompleted {
                stage: current.clone(),
                step: steps,
                appended,
                duration_ms,
            });

            match next_step(&graph, &current, &record) {
                NextStep::Stage(next) => {
                    tracing::debug!(from = %current, to = %next, "Route resolved");
                    self.events.emit(RunEvent::RouteResolved {
                        from: current.clone(),
                        to: next.clone(),
                    });
                    current = next;
                }
                NextStep::Terminal => break Termination::Terminal { from: current },
                NextStep::NoEdge => break Termination::NoOutgoingEdge { from: current },
            }
        };

        self.state = ExecutorState::Terminated;
        tracing::info!(steps, termination = ?termination, "Run terminated");
        self.events.emit(RunEvent::RunTerminated {
            termination: termination.clone(),
            steps,
        });

        RunResult {
            record,
            steps,
            visited,
            termination,
            state: self.state,
        }
    }
}

/// Resolve the stage after `from`. Router decisions naming an unregistered
/// stage resolve to the terminal marker.
fn next_step(graph: &StageGraph, from: &str, record: &StateRecord) -> NextStep {
    match graph.outgoing(from) {
        None => NextStep::NoEdge,
        Some(Outgoing::Fixed(target)) => {
            if graph.contains(target) {
                NextStep::Stage(target.clone())
            } else {
                NextStep::Terminal
            }
        }
        Some(Outgoing::Conditional(router)) => match router.route(record) {
            Route::End => NextStep::Terminal,
            Route::Stage(name) if graph.contains(&name) => NextStep::Stage(name),
            Route::Stage(name) => {
                tracing::warn!(from, route = %name, "Router selected unknown stage, ending run");
                NextStep::Terminal
            }
        },
    }
}

/// Run `graph` once with a fresh executor.
pub async fn run(graph: &StageGraph, overrides: Patch, iteration_bound: usize) -> Result<RunResult> {
    let config = RunConfig::new(iteration_bound)?;
    Ok(Executor::new(graph.clone(), config).run(overrides).await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, END};
    use crate::router::ChannelRouter;
    use crate::stage::{FnStage, StartStage};
    use serde_json::json;

    fn appender(name: &'static str) -> FnStage<impl Fn(&StateRecord) -> Patch + Send + Sync> {
        FnStage::new(name, move |_: &StateRecord| {
            Patch::new().append(name, Message::new(json!({"by": name})))
        })
    }

    fn linear_graph() -> StageGraph {
        let mut b = GraphBuilder::new();
        b.add(StartStage::new()).unwrap();
        b.add(appender("a")).unwrap();
        b.add(appender("b")).unwrap();
        b.add_edge("start", "a").unwrap();
        b.add_edge("a", "b").unwrap();
        b.add_edge("b", END).unwrap();
        b.set_entry("start").unwrap();
        b.build().unwrap()
    }

    #[test]
    fn zero_bound_is_rejected() {
        let err = RunConfig::new(0).unwrap_err();
        assert!(matches!(err, SleuthError::InvalidIterationBound { bound: 0 }));
        assert!(err.is_construction());
        assert_eq!(RunConfig::new(3).unwrap().iteration_bound(), 3);
    }

    #[tokio::test]
    async fn linear_run_reaches_terminal() {
        let result = run(&linear_graph(), Patch::new(), 10).await.unwrap();
        assert_eq!(result.visited, vec!["start", "a", "b"]);
        assert_eq!(result.steps, 3);
        assert_eq!(result.termination, Termination::Terminal { from: "b".into() });
        assert_eq!(result.state, ExecutorState::Terminated);
        assert_eq!(result.record.channel("a").len(), 1);
    }

    #[tokio::test]
    async fn stage_without_edges_stops_run() {
        let mut b = GraphBuilder::new();
        b.add(appender("only")).unwrap();
        b.set_entry("only").unwrap();
        let result = run(&b.build().unwrap(), Patch::new(), 5).await.unwrap();
        assert_eq!(result.steps, 1);
        assert_eq!(
            result.termination,
            Termination::NoOutgoingEdge {
                from: "only".into()
            }
        );
    }

    #[tokio::test]
    async fn bound_cuts_linear_run_short() {
        let result = run(&linear_graph(), Patch::new(), 2).await.unwrap();
        assert_eq!(result.steps, 2);
        assert!(result.bound_exceeded());
        let diag = result.record.last(channels::DIAGNOSTICS).unwrap();
        assert_eq!(diag.error_kind(), Some("bound_exceeded"));
        assert_eq!(diag.metadata["next_stage"], json!("b"));
    }

    #[tokio::test]
    async fn unknown_route_is_terminal() {
        let mut b = GraphBuilder::new();
        b.add(appender("a")).unwrap();
        b.add_conditional_edge("a", |_: &StateRecord| Route::to("nowhere"))
            .unwrap();
        b.set_entry("a").unwrap();
        let result = run(&b.build().unwrap(), Patch::new(), 5).await.unwrap();
        assert_eq!(result.termination, Termination::Terminal { from: "a".into() });
    }

    #[tokio::test]
    async fn executor_state_transitions_and_events() {
        let mut executor = Executor::new(linear_graph(), RunConfig::new(10).unwrap());
        assert_eq!(executor.state(), ExecutorState::Ready);
        let mut rx = executor.events().subscribe();

        let result = executor.run(Patch::new()).await;
        assert_eq!(executor.state(), ExecutorState::Terminated);
        assert_eq!(result.steps, 3);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunTerminated { steps: 3, .. })
        ));
        let started = events
            .iter()
            .filter(|e| matches!(e, RunEvent::StageStarted { .. }))
            .count();
        assert_eq!(started, 3);
    }

    #[tokio::test]
    async fn caller_supplied_emitter_receives_events() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        let mut executor =
            Executor::new(linear_graph(), RunConfig::new(10).unwrap()).with_events(emitter);

        executor.run(Patch::new()).await;
        drop(executor);

        let mut count = 0;
        while let Ok(event) = rx.recv().await {
            count += 1;
            if let RunEvent::RunTerminated { steps, .. } = event {
                assert_eq!(steps, 3);
            }
        }
        // started + 3 x (stage started, stage completed) + 2 routes + terminated
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn conditional_loop_uses_router() {
        let mut b = GraphBuilder::new();
        b.add(StartStage::new()).unwrap();
        b.add(FnStage::new("decide", |state: &StateRecord| {
            let next = if state.channel(channels::ROUTER).len() < 2 {
                "decide"
            } else {
                END
            };
            Patch::new().append(channels::ROUTER, Message::new(json!({"next_agent": next})))
        }))
        .unwrap();
        b.add_edge("start", "decide").unwrap();
        b.add_conditional_edge(
            "decide",
            ChannelRouter::new(channels::ROUTER, "next_agent").with_targets(["decide", END]),
        )
        .unwrap();
        b.set_entry("start").unwrap();

        let result = run(&b.build().unwrap(), Patch::new(), 10).await.unwrap();
        assert_eq!(result.visited, vec!["start", "decide", "decide", "decide"]);
        assert_eq!(result.record.channel(channels::ROUTER).len(), 3);
        assert!(!result.bound_exceeded());
    }
}
