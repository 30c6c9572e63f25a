//! Generation provider contract for Sleuth stages.
//!
//! Provides the `GenerationProvider` trait, the `DynProvider` wrapper, shared
//! request/response types, and `OpenAiAdapter` for OpenAI-compatible chat APIs.

mod openai;
mod provider;
mod types;

pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
