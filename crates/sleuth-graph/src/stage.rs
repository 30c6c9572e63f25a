//! Stage trait, dynamic dispatch wrapper, and the built-in start stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sleuth_types::{channels, scalars, Patch, StateRecord};

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// A named unit of work in a graph.
///
/// `process` reads the whole record and returns the patch the executor will
/// merge. It has no error path: collaborator failures and malformed upstream
/// input become diagnostic entries on the stage's own channel.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identity, used as the default registration name and log key.
    fn name(&self) -> &str;

    async fn process(&self, state: &StateRecord) -> Patch;
}

// ---------------------------------------------------------------------------
// DynStage
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DynStage(Arc<dyn Stage>);

impl DynStage {
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self(Arc::new(stage))
    }

    pub fn from_arc(stage: Arc<dyn Stage>) -> Self {
        Self(stage)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub async fn process(&self, state: &StateRecord) -> Patch {
        self.0.process(state).await
    }
}

impl std::fmt::Debug for DynStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynStage").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// FnStage
// ---------------------------------------------------------------------------

/// A stage backed by a synchronous closure. Useful for glue steps and tests.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StateRecord) -> Patch + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StateRecord) -> Patch + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        (self.f)(state)
    }
}

// ---------------------------------------------------------------------------
// StartStage
// ---------------------------------------------------------------------------

/// Entry stage that fills in built-in defaults.
///
/// Every default channel is created empty and every default scalar is set,
/// unless the caller's overrides already supplied it.
#[derive(Debug, Clone)]
pub struct StartStage {
    channels: Vec<String>,
    scalars: BTreeMap<String, Value>,
}

impl StartStage {
    /// Defaults for the research graph: every canonical channel and an empty
    /// research question.
    pub fn new() -> Self {
        Self {
            channels: channels::ALL.iter().map(|c| c.to_string()).collect(),
            scalars: BTreeMap::from([(
                scalars::RESEARCH_QUESTION.to_string(),
                Value::String(String::new()),
            )]),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scalars.insert(key.into(), value.into());
        self
    }
}

impl Default for StartStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for StartStage {
    fn name(&self) -> &str {
        "start"
    }

    async fn process(&self, state: &StateRecord) -> Patch {
        let mut patch = Patch::new();
        for channel in &self.channels {
            if !state.has_channel(channel) {
                patch = patch.declare(channel.as_str());
            }
        }
        for (key, value) in &self.scalars {
            if !state.has_scalar(key) {
                patch = patch.set_scalar(key.as_str(), value.clone());
            }
        }
        patch
    }
}
