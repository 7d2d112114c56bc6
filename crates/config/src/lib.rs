//! Configuration loading, validation, and management for deltaflow.
//!
//! Loads configuration from `~/.deltaflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use deltaflow_core::provider::ToolChoice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.deltaflow/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt prepended to every turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Round-loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Round-loop configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool rounds allowed per user turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Forward text to the caller as it streams, even in rounds that end up
    /// requesting tools
    #[serde(default)]
    pub stream_partial_content: bool,

    /// Use the streaming model path
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Upper bound on concurrently running tool calls
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,

    /// Per tool call timeout
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Timeout for consuming one round's stream
    #[serde(default = "default_model_timeout_secs")]
    pub stream_timeout_secs: u64,

    /// Timeout for one non-streaming model call
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Token budget for history fetched from memory
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// Batches in a row that may fail completely before the turn is ended
    #[serde(default = "default_max_consecutive_failed_rounds")]
    pub max_consecutive_failed_rounds: u32,

    /// Tool-choice mode sent with requests that offer tools
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent_tools() -> usize {
    4
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_context_token_budget() -> usize {
    8192
}
fn default_max_consecutive_failed_rounds() -> u32 {
    3
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            stream_partial_content: false,
            streaming: true,
            max_concurrent_tools: default_max_concurrent_tools(),
            tool_timeout_secs: default_tool_timeout_secs(),
            stream_timeout_secs: default_model_timeout_secs(),
            model_timeout_secs: default_model_timeout_secs(),
            context_token_budget: default_context_token_budget(),
            max_consecutive_failed_rounds: default_max_consecutive_failed_rounds(),
            tool_choice: ToolChoice::Auto,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deltaflow/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `DELTAFLOW_API_KEY`, then `OPENAI_API_KEY` (only if no key in file)
    /// - `DELTAFLOW_MODEL`
    /// - `DELTAFLOW_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("DELTAFLOW_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("DELTAFLOW_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("DELTAFLOW_API_URL") {
            self.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deltaflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        let agent = &self.agent;
        if agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }
        if agent.max_concurrent_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_concurrent_tools must be at least 1".into(),
            ));
        }
        if agent.max_consecutive_failed_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_consecutive_failed_rounds must be at least 1".into(),
            ));
        }
        if agent.tool_timeout_secs == 0
            || agent.stream_timeout_secs == 0
            || agent.model_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            agent: AgentConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for deltaflow_core::Error {
    fn from(e: ConfigError) -> Self {
        deltaflow_core::Error::config(e.to_string())
    }
}
