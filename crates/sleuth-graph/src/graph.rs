//! Graph assembly and the immutable, validated [`StageGraph`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use sleuth_types::{Result, SleuthError};

use crate::router::Router;
use crate::stage::{DynStage, Stage};

/// Reserved name of the terminal marker. Always a valid edge target, never a stage.
pub const END: &str = "end";

/// The outgoing edge set of one stage.
#[derive(Clone)]
pub enum Outgoing {
    Fixed(String),
    Conditional(Arc<dyn Router>),
}

impl Outgoing {
    fn kind(&self) -> &'static str {
        match self {
            Outgoing::Fixed(_) => "fixed",
            Outgoing::Conditional(_) => "conditional",
        }
    }
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Fixed(target) => f.debug_tuple("Fixed").field(target).finish(),
            Outgoing::Conditional(router) => f
                .debug_struct("Conditional")
                .field("targets", &router.targets())
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Assembles stages and edges. Each call validates its own arguments
/// eagerly; [`build`](GraphBuilder::build) checks the whole graph.
#[derive(Default)]
pub struct GraphBuilder {
    stages: HashMap<String, DynStage>,
    order: Vec<String>,
    edges: HashMap<String, Outgoing>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage` under `name`, which must equal [`Stage::name`]: the
    /// executor and the stage's own diagnostics both use it.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        stage: impl Stage + 'static,
    ) -> Result<&mut Self> {
        self.add_dyn_stage(name, DynStage::new(stage))
    }

    /// Register a stage under its own [`Stage::name`].
    pub fn add(&mut self, stage: impl Stage + 'static) -> Result<&mut Self> {
        let stage = DynStage::new(stage);
        let name = stage.name().to_string();
        self.add_dyn_stage(name, stage)
    }

    pub fn add_dyn_stage(&mut self, name: impl Into<String>, stage: DynStage) -> Result<&mut Self> {
        let name = name.into();
        if name == END {
            return Err(SleuthError::ReservedStageName { name });
        }
        if stage.name() != name {
            return Err(SleuthError::StageNameMismatch {
                registered: name,
                declared: stage.name().to_string(),
            });
        }
        if self.stages.contains_key(&name) {
            return Err(SleuthError::DuplicateStage { name });
        }
        tracing::debug!(stage = %name, "Registered stage");
        self.order.push(name.clone());
        self.stages.insert(name, stage);
        Ok(self)
    }

    pub fn add_edge(&mut self, source: &str, target: &str) -> Result<&mut Self> {
        self.require_stage(source)?;
        if target != END {
            self.require_stage(target)?;
        }
        self.insert_outgoing(source, Outgoing::Fixed(target.to_string()))
    }

    /// Make `router` the sole outgoing edge set of `source`.
    pub fn add_conditional_edge(
        &mut self,
        source: &str,
        router: impl Router + 'static,
    ) -> Result<&mut Self> {
        self.require_stage(source)?;
        self.insert_outgoing(source, Outgoing::Conditional(Arc::new(router)))
    }

    pub fn set_entry(&mut self, name: &str) -> Result<&mut Self> {
        self.require_stage(name)?;
        self.entry = Some(name.to_string());
        Ok(self)
    }

    pub fn build(self) -> Result<StageGraph> {
        let entry = self
            .entry
            .ok_or_else(|| SleuthError::graph_build(SleuthError::MissingEntry))?;

        // Fixed edges are checked on insertion; router targets only here.
        for source in &self.order {
            let Some(outgoing) = self.edges.get(source) else {
                continue;
            };
            let targets = match outgoing {
                Outgoing::Fixed(target) => vec![target.clone()],
                Outgoing::Conditional(router) => router.targets(),
            };
            for target in targets {
                if target != END && !self.stages.contains_key(&target) {
                    return Err(SleuthError::graph_build(SleuthError::UnknownStage {
                        name: target,
                    }));
                }
            }
        }

        tracing::info!(stages = self.order.len(), entry = %entry, "Built stage graph");
        Ok(StageGraph {
            stages: self.stages,
            order: self.order,
            edges: self.edges,
            entry,
        })
    }

    fn require_stage(&self, name: &str) -> Result<()> {
        if self.stages.contains_key(name) {
            Ok(())
        } else {
            Err(SleuthError::UnknownStage {
                name: name.to_string(),
            })
        }
    }

    fn insert_outgoing(&mut self, source: &str, outgoing: Outgoing) -> Result<&mut Self> {
        if let Some(existing) = self.edges.get(source) {
            return Err(SleuthError::ConflictingEdge {
                source_stage: source.to_string(),
                existing: existing.kind(),
            });
        }
        self.edges.insert(source.to_string(), outgoing);
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// StageGraph
// ---------------------------------------------------------------------------

/// A validated graph. Cheap to clone; stages and routers are shared.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: HashMap<String, DynStage>,
    order: Vec<String>,
    edges: HashMap<String, Outgoing>,
    entry: String,
}

impl StageGraph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn stage(&self, name: &str) -> Option<&DynStage> {
        self.stages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Stage names in registration order.
    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    pub fn outgoing(&self, name: &str) -> Option<&Outgoing> {
        self.edges.get(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Render as a Mermaid flowchart. Conditional edges are dotted, one per
    /// declared router target.
    ///
    /// Node ids are `n<registration index>` and the terminal marker is
    /// `n_end`; the stage name is only used as the label.
    pub fn to_mermaid(&self) -> String {
        let ids: HashMap<&str, String> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), format!("n{i}")))
            .collect();
        let id = |name: &str| ids.get(name).map_or(END_NODE, String::as_str);

        let mut out = String::from("flowchart TD\n");
        for name in &self.order {
            let _ = writeln!(out, "    {}[\"{}\"]", id(name), name.replace('"', "#quot;"));
        }
        let _ = writeln!(out, "    {END_NODE}([\"{END}\"])");

        for source in &self.order {
            match self.edges.get(source) {
                Some(Outgoing::Fixed(target)) => {
                    let _ = writeln!(out, "    {} --> {}", id(source), id(target));
                }
                Some(Outgoing::Conditional(router)) => {
                    let targets = router.targets();
                    if targets.is_empty() {
                        let _ = writeln!(out, "    {} -. route .-> {END_NODE}", id(source));
                    }
                    for target in targets {
                        let _ = writeln!(out, "    {} -.-> {}", id(source), id(&target));
                    }
                }
                None => {}
            }
        }

        let _ = writeln!(out, "    style {} fill:#ffdfba", id(&self.entry));
        let _ = writeln!(out, "    style {END_NODE} fill:#baffc9");
        out
    }
}

/// `end` is a Mermaid keyword, so the terminal node gets its own id.
const END_NODE: &str = "n_end";
