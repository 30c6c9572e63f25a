//! The structured entry appended to a state channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, SleuthError};

/// Metadata key carrying the error kind of a diagnostic entry.
pub const ERROR_KIND: &str = "error_kind";

/// Metadata key marking entries whose content is opaque text.
pub const FORMAT: &str = "format";

/// One entry in a channel: a domain payload plus diagnostic/context fields.
///
/// `content` is either a structured document or a string. Model output often
/// arrives as a JSON document encoded in a string (sometimes inside a markdown
/// code fence); [`Message::decode`] handles both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// An entry with structured content and no metadata.
    pub fn new(content: impl Into<Value>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// An entry whose content is plain text that is not expected to decode.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Value::String(text.into())).with_metadata(FORMAT, "text")
    }

    /// A diagnostic entry: human-readable description plus an error kind.
    pub fn error(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Value::String(description.into())).with_metadata(ERROR_KIND, kind.into())
    }

    /// Diagnostic entry built from a [`SleuthError`].
    pub fn from_error(err: &SleuthError) -> Self {
        Self::error(err.kind(), err.to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.metadata.contains_key(ERROR_KIND)
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.metadata.get(ERROR_KIND).and_then(Value::as_str)
    }

    /// Decode the content as a document with named fields.
    pub fn decode(&self) -> Result<Map<String, Value>> {
        match &self.content {
            Value::Object(map) => Ok(map.clone()),
            Value::String(s) => {
                let parsed: Value =
                    serde_json::from_str(strip_code_fence(s)).map_err(|e| SleuthError::Decode {
                        message: e.to_string(),
                    })?;
                match parsed {
                    Value::Object(map) => Ok(map),
                    other => Err(SleuthError::Decode {
                        message: format!("expected a document, found {}", type_name(&other)),
                    }),
                }
            }
            other => Err(SleuthError::Decode {
                message: format!("expected a document, found {}", type_name(other)),
            }),
        }
    }

    /// Look up a named field of the decoded content.
    pub fn field(&self, key: &str) -> Option<Value> {
        self.decode().ok().and_then(|mut map| map.remove(key))
    }

    /// String-valued field of the decoded content.
    pub fn str_field(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The content as opaque text, for consumers that tolerate decode failures.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a document",
    }
}
