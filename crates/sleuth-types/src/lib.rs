//! Shared types, errors, state record, and configuration for the Sleuth research engine.
//!
//! This crate provides the foundational types used across all other Sleuth crates:
//! - `SleuthError`: unified error taxonomy
//! - `Message`: the `{content, metadata}` entry appended to channels
//! - `StateRecord` / `Patch`: the shared record threaded through stages and its updates
//! - `ResearchConfig`: the on-disk configuration format

pub mod config;
pub mod message;
pub mod state;

pub use config::{
    CallsConfig, ModelConfig, ResearchConfig, RunLimits, ScraperConfig, SearchConfig,
    Server,
};
pub use message::Message;
pub use state::{channels, scalars, Patch, StateRecord};

/// Unified error type for all Sleuth subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    // === Graph construction errors ===
    #[error("Stage '{name}' is already registered")]
    DuplicateStage { name: String },

    #[error("Unknown stage '{name}'")]
    UnknownStage { name: String },

    #[error("Stage '{source_stage}' already has {existing} outgoing edges")]
    ConflictingEdge {
        source_stage: String,
        existing: &'static str,
    },

    #[error("Stage name '{name}' is reserved for the terminal marker")]
    ReservedStageName { name: String },

    #[error("Stage registered as '{registered}' names itself '{declared}'")]
    StageNameMismatch { registered: String, declared: String },

    #[error("No entry stage set")]
    MissingEntry,

    #[error("Graph build failed: {0}")]
    GraphBuild(#[source] Box<SleuthError>),

    #[error("Iteration bound must be at least 1, got {bound}")]
    InvalidIterationBound { bound: usize },

    // === Decode errors ===
    #[error("Could not decode structured content: {message}")]
    Decode { message: String },

    // === Collaborator errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Call to {operation} timed out after {timeout_ms}ms")]
    CallTimeout { operation: String, timeout_ms: u64 },

    #[error("Search via {provider} failed: {message}")]
    SearchError { provider: String, message: String },

    // === Configuration ===
    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SleuthError {
    /// Wrap a construction error as the cause of a failed `build()`.
    pub fn graph_build(cause: SleuthError) -> Self {
        SleuthError::GraphBuild(Box::new(cause))
    }

    /// Returns `true` if the error is transient and the call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SleuthError::RateLimited { .. }
                | SleuthError::CallTimeout { .. }
                | SleuthError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` for errors raised while assembling a graph or run.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            SleuthError::DuplicateStage { .. }
                | SleuthError::UnknownStage { .. }
                | SleuthError::ConflictingEdge { .. }
                | SleuthError::ReservedStageName { .. }
                | SleuthError::StageNameMismatch { .. }
                | SleuthError::MissingEntry
                | SleuthError::GraphBuild(_)
                | SleuthError::InvalidIterationBound { .. }
        )
    }

    /// Short machine-readable kind, stored as `error_kind` in diagnostic entries.
    pub fn kind(&self) -> &'static str {
        match self {
            SleuthError::DuplicateStage { .. } => "duplicate_stage",
            SleuthError::UnknownStage { .. } => "unknown_stage",
            SleuthError::ConflictingEdge { .. } => "conflicting_edge",
            SleuthError::ReservedStageName { .. } => "reserved_stage_name",
            SleuthError::StageNameMismatch { .. } => "stage_name_mismatch",
            SleuthError::MissingEntry => "missing_entry",
            SleuthError::GraphBuild(_) => "graph_build",
            SleuthError::InvalidIterationBound { .. } => "invalid_iteration_bound",
            SleuthError::Decode { .. } => "decode",
            SleuthError::ProviderError { .. } => "provider",
            SleuthError::RateLimited { .. } => "rate_limited",
            SleuthError::AuthError { .. } => "auth",
            SleuthError::CallTimeout { .. } => "timeout",
            SleuthError::SearchError { .. } => "search",
            SleuthError::ConfigNotFound(_) | SleuthError::Config(_) => "config",
            SleuthError::Io(_) => "io",
            SleuthError::Json(_) => "json",
            SleuthError::Other(_) => "other",
        }
    }
}

/// A convenience alias for `Result<T, SleuthError>`.
pub type Result<T> = std::result::Result<T, SleuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_duplicate_stage() {
        let err = SleuthError::DuplicateStage {
            name: "planner".into(),
        };
        assert_eq!(err.to_string(), "Stage 'planner' is already registered");
    }

    #[test]
    fn error_display_conflicting_edge() {
        let err = SleuthError::ConflictingEdge {
            source_stage: "router".into(),
            existing: "conditional",
        };
        assert_eq!(
            err.to_string(),
            "Stage 'router' already has conditional outgoing edges"
        );
    }

    #[test]
    fn graph_build_wraps_cause() {
        let err = SleuthError::graph_build(SleuthError::MissingEntry);
        assert_eq!(err.to_string(), "Graph build failed: No entry stage set");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "No entry stage set");
    }

    #[test]
    fn error_display_provider_error() {
        let err = SleuthError::ProviderError {
            provider: "openai".into(),
            status: 500,
            message: "internal server error".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Provider openai returned HTTP 500: internal server error"
        );
    }

    // --- is_retryable ---

    #[test]
    fn retryable_rate_limited() {
        let err = SleuthError::RateLimited {
            provider: "x".into(),
            retry_after_ms: 1000,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn retryable_timeout() {
        let err = SleuthError::CallTimeout {
            operation: "search".into(),
            timeout_ms: 5000,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn not_retryable_provider_error_when_not_flagged() {
        let err = SleuthError::ProviderError {
            provider: "x".into(),
            status: 400,
            message: "bad request".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_retryable_auth_error() {
        let err = SleuthError::AuthError {
            provider: "x".into(),
        };
        assert!(!err.is_retryable());
    }

    // --- classification ---

    #[test]
    fn construction_errors_are_classified() {
        assert!(SleuthError::MissingEntry.is_construction());
        assert!(SleuthError::UnknownStage { name: "x".into() }.is_construction());
        assert!(!SleuthError::Decode {
            message: "bad".into()
        }
        .is_construction());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(
            SleuthError::AuthError {
                provider: "x".into()
            }
            .kind(),
            "auth"
        );
        assert_eq!(
            SleuthError::Decode {
                message: "x".into()
            }
            .kind(),
            "decode"
        );
        assert_eq!(SleuthError::Other("x".into()).kind(), "other");
    }

    // --- From impls ---

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SleuthError = json_err.into();
        assert!(matches!(err, SleuthError::Json(_)));
    }
}
