//! Configuration loading, validation, and management for Nexus.
//!
//! Loads configuration from `~/.nexus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.nexus/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion service settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Home Assistant connection
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,

    /// Where persisted state lives
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// --- [llm] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Rank recalled memories by embedding similarity instead of keywords
    #[serde(default)]
    pub semantic_recall: bool,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            embedding_model: default_embedding_model(),
            semantic_recall: false,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .field("semantic_recall", &self.semantic_recall)
            .finish()
    }
}

// --- [home_assistant] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    /// REST base, including the `/api` suffix
    #[serde(default = "default_ha_url")]
    pub api_url: String,

    /// Long-lived access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_ha_url() -> String {
    "http://supervisor/core/api".into()
}
fn default_request_timeout() -> u64 {
    30
}

impl HomeAssistantConfig {
    /// Build a config from a user-supplied instance URL such as
    /// `http://homeassistant.local:8123/`.
    pub fn from_instance_url(instance_url: &str, token: impl Into<String>) -> Self {
        Self {
            api_url: format!("{}/api", instance_url.trim_end_matches('/')),
            token: Some(token.into()),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            api_url: default_ha_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("api_url", &self.api_url)
            .field("token", &redact(&self.token))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// --- [storage] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    AppConfig::config_dir().join("nexus.sqlite")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

// --- [agent] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum entity lines placed in the prompt context
    #[serde(default = "default_max_context_entries")]
    pub max_context_entries: usize,

    /// Memories recalled per query
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Persist each answered query as an interaction memory
    #[serde(default = "default_true")]
    pub record_interactions: bool,

    /// Home location, passed to the model as extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

fn default_max_context_entries() -> usize {
    15
}
fn default_recall_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_entries: default_max_context_entries(),
            recall_limit: default_recall_limit(),
            record_interactions: true,
            location: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.nexus/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `NEXUS_API_KEY`, then `OPENAI_API_KEY`
    /// - `NEXUS_MODEL`
    /// - `HA_URL`
    /// - `HA_TOKEN`, then `SUPERVISOR_TOKEN`
    /// - `DATA_DIR` (database becomes `$DATA_DIR/nexus.sqlite`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("NEXUS_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }

        if let Some(model) = var("NEXUS_MODEL") {
            self.llm.model = model;
        }

        if let Some(url) = var("HA_URL") {
            self.home_assistant.api_url = url;
        }

        if let Some(token) = var("HA_TOKEN").or_else(|| var("SUPERVISOR_TOKEN")) {
            self.home_assistant.token = Some(token);
        }

        if let Some(dir) = var("DATA_DIR") {
            self.storage.path = PathBuf::from(dir).join("nexus.sqlite");
        }
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".nexus")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "llm.max_tokens must be > 0".into(),
            ));
        }

        if self.agent.max_context_entries == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_context_entries must be > 0".into(),
            ));
        }

        if !self.home_assistant.api_url.starts_with("http://")
            && !self.home_assistant.api_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(format!(
                "home_assistant.api_url must be an http(s) URL, got '{}'",
                self.home_assistant.api_url
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.llm.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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

impl From<ConfigError> for nexus_core::Error {
    fn from(err: ConfigError) -> Self {
        nexus_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.home_assistant.api_url, "http://supervisor/core/api");
        assert_eq!(config.agent.max_context_entries, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.storage.path, config.storage.path);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.llm.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_ha_url_rejected() {
        let mut config = AppConfig::default();
        config.home_assistant.api_url = "supervisor/core/api".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("home_assistant.api_url"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().llm.model, "gpt-4o");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[llm]
model = "gpt-4o-mini"

[agent]
location = "Lisbon"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.agent.location.as_deref(), Some("Lisbon"));
        assert_eq!(config.agent.recall_limit, 5);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nmodel = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("NEXUS_API_KEY", "sk-nexus"),
            ("SUPERVISOR_TOKEN", "supervisor"),
            ("HA_URL", "http://ha.local:8123/api"),
            ("DATA_DIR", "/data"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-nexus"));
        assert_eq!(config.home_assistant.token.as_deref(), Some("supervisor"));
        assert_eq!(config.home_assistant.api_url, "http://ha.local:8123/api");
        assert_eq!(config.storage.path, PathBuf::from("/data/nexus.sqlite"));
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn instance_url_gets_api_suffix() {
        let ha = HomeAssistantConfig::from_instance_url("http://homeassistant.local:8123/", "t");
        assert_eq!(ha.api_url, "http://homeassistant.local:8123/api");
        assert!(ha.has_token());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-secret".into());
        config.home_assistant.token = Some("ha-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("ha-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o"));
        assert!(toml_str.contains("supervisor/core/api"));
    }
}
