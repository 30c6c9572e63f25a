//! Conditional routing: pick the next stage from the current record.

use serde_json::Value;

use sleuth_types::StateRecord;

use crate::graph::END;

/// A router's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Stage(String),
    End,
}

impl Route {
    pub fn to(name: impl Into<String>) -> Self {
        Route::Stage(name.into())
    }

    /// Interpret a decision string; the terminal marker name maps to [`Route::End`].
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name == END {
            Route::End
        } else {
            Route::Stage(name.to_string())
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Route::End)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Route::Stage(name) => name,
            Route::End => END,
        }
    }
}

/// Selects the next stage from the current record.
///
/// Must be pure: the same record always yields the same route. A route naming
/// a stage the graph does not contain is treated as terminal by the executor.
pub trait Router: Send + Sync {
    fn route(&self, state: &StateRecord) -> Route;

    /// Stage names this router can return, checked when the graph is built.
    /// An empty list skips the check.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> Router for F
where
    F: Fn(&StateRecord) -> Route + Send + Sync,
{
    fn route(&self, state: &StateRecord) -> Route {
        self(state)
    }
}

// ---------------------------------------------------------------------------
// ChannelRouter
// ---------------------------------------------------------------------------

/// Routes on a string field of one channel's last entry.
///
/// Empty channel, undecodable content, and a missing or non-string field all
/// resolve to [`Route::End`]. With declared targets, any other name does too.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    channel: String,
    key: String,
    targets: Vec<String>,
}

impl ChannelRouter {
    pub fn new(channel: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            key: key.into(),
            targets: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Router for ChannelRouter {
    fn route(&self, state: &StateRecord) -> Route {
        let Some(entry) = state.last(&self.channel) else {
            tracing::debug!(channel = %self.channel, "Router channel empty, ending run");
            return Route::End;
        };

        let doc = match entry.decode() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "Undecodable routing entry, ending run");
                return Route::End;
            }
        };

        match doc.get(&self.key) {
            Some(Value::String(name)) => {
                let route = Route::from_name(name);
                let declared = self.targets.is_empty()
                    || self.targets.iter().any(|t| t == route.as_str());
                if route.is_end() || declared {
                    route
                } else {
                    tracing::warn!(channel = %self.channel, route = %name, "Route not among declared targets, ending run");
                    Route::End
                }
            }
            _ => {
                tracing::warn!(channel = %self.channel, key = %self.key, "Routing key absent, ending run");
                Route::End
            }
        }
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }
}
