//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (the CLI progress printer, loggers, tests) can follow a run
//! without coupling to the executor internals.

use serde::{Deserialize, Serialize};

use crate::engine::Termination;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        entry: String,
        iteration_bound: usize,
    },
    StageStarted {
        stage: String,
        step: usize,
    },
    StageCompleted {
        stage: String,
        step: usize,
        appended: Vec<String>,
        duration_ms: u64,
    },
    RouteResolved {
        from: String,
        to: String,
    },
    RunTerminated {
        termination: Termination,
        steps: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
