//! The state record threaded through every stage, and the patches stages return.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// Canonical channel names used by the research stages.
pub mod channels {
    pub const PLANNER: &str = "planner_response";
    pub const SERPER: &str = "serper_response";
    pub const SELECTOR: &str = "selector_response";
    pub const SCRAPER: &str = "scraper_response";
    pub const REPORTER: &str = "reporter_response";
    pub const REVIEWER: &str = "reviewer_response";
    pub const ROUTER: &str = "router_response";
    pub const FINAL_REPORTS: &str = "final_reports";
    /// Terminal-flag channel; the final-report stage appends `{"end": true}`.
    pub const END_CHAIN: &str = "end_chain";
    /// Engine-level diagnostics (bound exceeded, rejected patches).
    pub const DIAGNOSTICS: &str = "diagnostics";

    pub const ALL: &[&str] = &[
        PLANNER,
        SERPER,
        SELECTOR,
        SCRAPER,
        REPORTER,
        REVIEWER,
        ROUTER,
        FINAL_REPORTS,
        END_CHAIN,
        DIAGNOSTICS,
    ];
}

/// Well-known run-level scalar fields.
pub mod scalars {
    pub const RESEARCH_QUESTION: &str = "research_question";
    pub const TENANT_ID: &str = "tenant_id";
    pub const SESSION_ID: &str = "session_id";
}

/// Scalar fields that may be set once per run and never changed.
const IMMUTABLE_SCALARS: &[&str] = &[scalars::RESEARCH_QUESTION];

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A partial update returned by a stage: entries to append per channel and
/// scalar fields to overwrite. An empty entry list still creates the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub appends: BTreeMap<String, Vec<Message>>,
    #[serde(default)]
    pub scalars: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`push`](Patch::push).
    pub fn append(mut self, channel: impl Into<String>, message: Message) -> Self {
        self.push(channel, message);
        self
    }

    pub fn push(&mut self, channel: impl Into<String>, message: Message) {
        self.appends.entry(channel.into()).or_default().push(message);
    }

    /// Ensure `channel` exists after the merge without appending to it.
    pub fn declare(mut self, channel: impl Into<String>) -> Self {
        self.appends.entry(channel.into()).or_default();
        self
    }

    pub fn set_scalar(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scalars.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.appends.is_empty() && self.scalars.is_empty()
    }

    /// Names of channels that receive at least one entry.
    pub fn appended_channels(&self) -> Vec<String> {
        self.appends
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StateRecord
// ---------------------------------------------------------------------------

/// Mapping from channel name to an append-only sequence of entries, plus
/// run-level scalar fields.
///
/// The only mutation is [`apply`](StateRecord::apply): channels only grow and
/// immutable scalars keep their first value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    channels: BTreeMap<String, Vec<Message>>,
    scalars: BTreeMap<String, Value>,
}

impl StateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// The research question, or `""` when the run has none.
    pub fn research_question(&self) -> &str {
        self.scalar_str(scalars::RESEARCH_QUESTION).unwrap_or("")
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.scalar_str(scalars::TENANT_ID)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.scalar_str(scalars::SESSION_ID)
    }

    pub fn scalar(&self, key: &str) -> Option<&Value> {
        self.scalars.get(key)
    }

    pub fn scalar_str(&self, key: &str) -> Option<&str> {
        self.scalars.get(key).and_then(Value::as_str)
    }

    pub fn has_scalar(&self, key: &str) -> bool {
        self.scalars.contains_key(key)
    }

    /// Entries of a channel; an absent channel reads as empty.
    pub fn channel(&self, name: &str) -> &[Message] {
        self.channels.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Current value of a channel: its last entry.
    pub fn last(&self, name: &str) -> Option<&Message> {
        self.channels.get(name).and_then(|entries| entries.last())
    }

    /// Length of every channel, keyed by name.
    pub fn channel_lengths(&self) -> BTreeMap<String, usize> {
        self.channels
            .iter()
            .map(|(name, entries)| (name.clone(), entries.len()))
            .collect()
    }

    /// Whether the terminal-flag channel's current value says the run is over.
    pub fn ended(&self) -> bool {
        self.last(channels::END_CHAIN)
            .and_then(|m| m.field("end"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Merge a patch: append entries per channel, overwrite scalars.
    ///
    /// Attempts to change an immutable scalar that is already set are dropped;
    /// each one is recorded as an entry in [`channels::DIAGNOSTICS`]. Returns
    /// the rejected keys.
    pub fn apply(&mut self, patch: Patch) -> Vec<String> {
        let mut rejected = Vec::new();

        for (key, value) in patch.scalars {
            let locked = IMMUTABLE_SCALARS.contains(&key.as_str())
                && self.scalars.get(&key).is_some_and(|old| *old != value);
            if locked {
                tracing::warn!(field = %key, "Ignoring change to immutable field");
                rejected.push(key);
                continue;
            }
            self.scalars.insert(key, value);
        }

        for (channel, entries) in patch.appends {
            self.channels.entry(channel).or_default().extend(entries);
        }

        for key in &rejected {
            self.channels
                .entry(channels::DIAGNOSTICS.to_string())
                .or_default()
                .push(Message::error(
                    "immutable_field",
                    format!("Field '{key}' cannot change during a run"),
                ));
        }

        rejected
    }
}
