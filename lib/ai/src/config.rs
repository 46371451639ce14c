//! Orchestrator configuration.
//!
//! Loaded via the `config` crate from `TICKERTALK__*` environment variables,
//! or from a TOML document when the orchestrator is embedded.

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to store when the model sends no assistant text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyAssistantContent {
    /// Store the assistant message with empty content.
    #[default]
    Keep,
    /// Store tool-call-only messages without content and drop messages that
    /// carry neither text nor tool calls.
    Omit,
}

/// Settings for the round controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Model used by sessions that do not pick one.
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion requests allowed per user turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Time allowed for the completion stream to open, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Time allowed between two deltas, in seconds.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,

    /// Time allowed for one tool call, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Retry policy for opening the completion stream.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How assistant messages without text are stored.
    #[serde(default)]
    pub empty_assistant_content: EmptyAssistantContent,
}

fn default_model() -> String {
    "llama3-70b-8192".to_string()
}

fn default_max_rounds() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_stream_idle_timeout_secs() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_rounds: default_max_rounds(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            retry: RetryPolicy::default(),
            empty_assistant_content: EmptyAssistantContent::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from `TICKERTALK__*` environment variables.
    ///
    /// Nested fields use `__` as well, e.g. `TICKERTALK__RETRY__MAX_RETRIES`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TICKERTALK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or does not fit.
    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero round budget, an empty model name,
    /// or a temperature that is negative or not finite.
    pub fn validate(&self) -> Result<(), Report<LlmError>> {
        let invalid = |reason: &str| -> Report<LlmError> {
            LlmError::InvalidConfig {
                reason: reason.to_string(),
            }
            .into()
        };
        if self.max_rounds == 0 {
            return Err(invalid("max_rounds must be at least 1"));
        }
        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(invalid("temperature must be a non-negative number"));
        }
        Ok(())
    }

    /// Time allowed for the completion stream to open.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Time allowed between two deltas.
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Time allowed for one tool call.
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
