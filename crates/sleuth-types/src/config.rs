//! On-disk configuration for a research run.
//!
//! Every section and field has a default, so an empty file (or no file) is a
//! valid configuration. Credentials are not stored here; they are read from
//! the environment by the binary and handed to collaborator constructors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, SleuthError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub run: RunLimits,
    #[serde(default)]
    pub calls: CallsConfig,
}

/// Generation backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Server {
    #[default]
    Openai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub server: Server,
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub model_endpoint: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            server: Server::default(),
            model: default_model(),
            model_endpoint: None,
            temperature: 0.0,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Maximum stage invocations per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

/// Limits applied to each external call made inside a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallsConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Upper bound on `calls.max_retries`.
pub const MAX_RETRIES: usize = 10;

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_search_endpoint() -> String {
    "https://google.serper.dev/search".into()
}
fn default_max_chars() -> usize {
    4000
}
fn default_user_agent() -> String {
    "sleuth/0.1".into()
}
fn default_max_steps() -> usize {
    40
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> usize {
    2
}

impl ResearchConfig {
    /// Load configuration from a TOML file, expanding `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SleuthError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&expand_env_vars(&content))
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| SleuthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.max_steps == 0 {
            return Err(SleuthError::Config("run.max_steps must be at least 1".into()));
        }
        if self.calls.timeout_secs == 0 {
            return Err(SleuthError::Config("calls.timeout_secs must be at least 1".into()));
        }
        if self.calls.max_retries > MAX_RETRIES {
            return Err(SleuthError::Config(format!(
                "calls.max_retries must be at most {MAX_RETRIES}, got {}",
                self.calls.max_retries
            )));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(SleuthError::Config(format!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.model.temperature
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SleuthError::Config(e.to_string()))
    }
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
/// Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match std::env::var(&name) {
                Ok(value) if closed => result.push_str(&value),
                _ => {
                    result.push_str("${");
                    result.push_str(&name);
                    if closed {
                        result.push('}');
                    }
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ResearchConfig::from_toml("").unwrap();
        assert_eq!(config, ResearchConfig::default());
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.run.max_steps, 40);
        assert_eq!(config.scraper.max_chars, 4000);
        assert_eq!(config.search.endpoint, "https://google.serper.dev/search");
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = ResearchConfig::from_toml(
            r#"
[model]
model = "gpt-4o"
temperature = 0.7
stop = ["END"]

[run]
max_steps = 12
"#,
        )
        .unwrap();
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.model.stop, vec!["END".to_string()]);
        assert_eq!(config.model.server, Server::Openai);
        assert_eq!(config.run.max_steps, 12);
        assert_eq!(config.calls.max_retries, 2);
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let err = ResearchConfig::from_toml("[run]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, SleuthError::Config(_)));
    }

    #[test]
    fn call_limits_are_bounded() {
        let err = ResearchConfig::from_toml("[calls]\ntimeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, SleuthError::Config(ref m) if m.contains("timeout_secs")));

        let err = ResearchConfig::from_toml("[calls]\nmax_retries = 60\n").unwrap_err();
        assert!(matches!(err, SleuthError::Config(ref m) if m.contains("max_retries")));

        let config = ResearchConfig::from_toml("[calls]\nmax_retries = 10\n").unwrap();
        assert_eq!(config.calls.max_retries, MAX_RETRIES);
    }

    #[test]
    fn unknown_server_is_rejected() {
        let err = ResearchConfig::from_toml("[model]\nserver = \"carrier_pigeon\"\n").unwrap_err();
        assert!(matches!(err, SleuthError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sleuth.toml");
        std::fs::write(&path, "[scraper]\nmax_chars = 100\n").unwrap();

        let config = ResearchConfig::load(&path).unwrap();
        assert_eq!(config.scraper.max_chars, 100);
    }

    #[test]
    fn load_missing_file() {
        let err = ResearchConfig::load(Path::new("/nonexistent/sleuth.toml")).unwrap_err();
        assert!(matches!(err, SleuthError::ConfigNotFound(_)));
    }

    #[test]
    fn expand_env_vars_substitutes() {
        std::env::set_var("SLEUTH_TEST_ENDPOINT", "http://localhost:9");
        let out = expand_env_vars("endpoint = \"${SLEUTH_TEST_ENDPOINT}\"");
        assert_eq!(out, "endpoint = \"http://localhost:9\"");
        std::env::remove_var("SLEUTH_TEST_ENDPOINT");
    }

    #[test]
    fn expand_env_vars_keeps_missing() {
        let out = expand_env_vars("key = \"${SLEUTH_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "key = \"${SLEUTH_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ResearchConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(ResearchConfig::from_toml(&text).unwrap(), config);
    }
}
